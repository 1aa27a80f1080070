//! Ephemeral state store adapters.

mod memory;
mod redis;

pub use memory::InMemoryStateStore;
pub use self::redis::RedisStateStore;
