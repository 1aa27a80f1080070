use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

use crate::domain::types::StageKind;

/// Command-line arguments for the docpipe binary.
#[derive(Debug, Parser)]
#[command(
    name = "docpipe",
    version,
    about = "Text to PDF document pipeline workers and tooling"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOCPIPE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the worker for one pipeline stage.
    Worker(Box<WorkerArgs>),
    /// Declare or check the broker topology of every stage.
    Topology(TopologyArgs),
    /// Submit text for conversion.
    Submit(SubmitArgs),
    /// Show the current state of a task.
    Status(TaskArgs),
    /// List finished tasks owned by a user.
    List(ListArgs),
    /// Delete a finished task.
    Delete(TaskArgs),
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    /// Stage this worker consumes for.
    #[arg(value_enum)]
    pub stage: StageKind,

    #[command(flatten)]
    pub overrides: WorkerOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct TopologyArgs {
    #[arg(value_enum)]
    pub action: TopologyAction,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TopologyAction {
    /// Declare exchanges, queues and bindings.
    Setup,
    /// Passively check that everything is declared.
    Verify,
}

#[derive(Debug, Args, Clone)]
pub struct SubmitArgs {
    /// Owner of the new task.
    #[arg(long = "user-id", value_name = "UUID")]
    pub user_id: Uuid,

    /// Text to convert.
    #[arg(long, value_name = "TEXT", conflicts_with = "file")]
    pub text: Option<String>,

    /// Read the text to convert from a file.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct TaskArgs {
    /// Task identifier.
    #[arg(value_name = "TASK_ID")]
    pub id: Uuid,

    /// User the task must belong to.
    #[arg(long = "user-id", value_name = "UUID")]
    pub user_id: Uuid,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    /// Owner whose tasks are listed.
    #[arg(long = "user-id", value_name = "UUID")]
    pub user_id: Uuid,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the broker connection URL.
    #[arg(long = "broker-url", value_name = "URL")]
    pub broker_url: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override how many delayed retries a message gets before escalation.
    #[arg(long = "max-retries", value_name = "COUNT")]
    pub max_retries: Option<u32>,

    /// Override the delay before a rejected message is redelivered.
    #[arg(long = "retry-delay-ms", value_name = "MILLIS")]
    pub retry_delay_ms: Option<u32>,

    /// Override the HTML-to-PDF converter executable.
    #[arg(long = "render-pdf-cli-path", value_name = "PATH")]
    pub pdf_cli_path: Option<PathBuf>,

    /// Override the directory rendered documents are written to.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,
}
