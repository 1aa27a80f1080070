use crate::application::repos::RepoError;

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const NOT_NULL_VIOLATION: &str = "23502";

/// Classify a driver error by its SQLSTATE code.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    let sqlx::Error::Database(db) = &err else {
        return RepoError::from_persistence(err);
    };
    let constraint = db.constraint().unwrap_or("unknown").to_string();

    match db.code().as_deref() {
        Some(UNIQUE_VIOLATION) => RepoError::Duplicate { constraint },
        Some(CHECK_VIOLATION | NOT_NULL_VIOLATION) => RepoError::Integrity {
            constraint,
            message: db.message().to_string(),
        },
        _ => RepoError::from_persistence(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_without_sqlstate_are_persistence_failures() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            RepoError::Persistence(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            RepoError::Persistence(_)
        ));
    }
}
