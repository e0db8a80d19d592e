//! Database error types.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/server.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A row with the same unique key already exists.
    #[error("{entity} already exists: {key}")]
    UniqueViolation { entity: &'static str, key: String },

    /// The row to update does not exist (or is soft deleted).
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored value could not be decoded.
    #[error("invalid {entity} row: {reason}")]
    InvalidRow { entity: &'static str, reason: String },

    /// The store cannot serve requests (poisoned lock, injected failure).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Map a query error, turning Postgres unique violations (23505) into
    /// [`DbError::UniqueViolation`].
    pub(crate) fn from_query(entity: &'static str, key: impl Into<String>, e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some("23505") {
                return Self::UniqueViolation {
                    entity,
                    key: key.into(),
                };
            }
        }
        Self::Query(e)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_stay_query_errors() {
        let err = DbError::from_query("deployment", "myapp", sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::Query(_)));
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_messages_name_the_entity() {
        let err = DbError::UniqueViolation {
            entity: "deployment reservation",
            key: "myapp.apps".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "deployment reservation already exists: myapp.apps"
        );
    }
}
