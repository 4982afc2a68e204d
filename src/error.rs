use thiserror::Error;

/// Errors surfaced by ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid fee record: {0}")]
    Validation(String),

    #[error("fee record {0} not found")]
    NotFound(String),

    #[error("could not sync fees for student {student_id}: {source}")]
    Sync {
        student_id: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn is_sync(&self) -> bool {
        matches!(self, LedgerError::Sync { .. })
    }
}

/// Failures of the durable ledger storage
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("ledger storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode ledger: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("stored ledger under {key} is corrupt: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger of {size} bytes exceeds storage quota of {limit} bytes")]
    QuotaExceeded { size: usize, limit: usize },
}

/// Failures talking to the school backend
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("student {0} not found on the backend")]
    NotFound(String),

    #[error("{0}")]
    Injected(String),
}
