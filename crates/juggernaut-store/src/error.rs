use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A uniqueness or foreign-key constraint rejected the write.
    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("could not encode value: {0}")]
    Serialization(String),

    #[error("io: {0}")]
    Io(String),

    #[error("bad value in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        let constraint = matches!(
            &e,
            rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
        );
        if constraint {
            Self::Conflict(e.to_string())
        } else {
            Self::Database(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
