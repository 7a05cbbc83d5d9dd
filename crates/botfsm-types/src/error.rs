use thiserror::Error;

/// Errors from the payload codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization error ({method}): {message}")]
    Serialization { method: &'static str, message: String },

    #[error("deserialization error ({method}): {message}")]
    Deserialization { method: &'static str, message: String },
}

/// Errors from running a statement against the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("connection pool exhausted: no session within {timeout_ms}ms")]
    PoolExhausted { timeout_ms: u64 },

    #[error("operation timed out after {timeout_ms}ms")]
    OperationTimeout { timeout_ms: u64 },

    #[error("backend fault: {message}")]
    BackendFault { message: String, retryable: bool },
}

impl ExecutorError {
    /// Whether the fault is transient and the statement may be re-run.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::PoolExhausted { .. } | ExecutorError::OperationTimeout { .. } => true,
            ExecutorError::BackendFault { retryable, .. } => *retryable,
        }
    }
}

/// Failure to create the backing table at startup.
#[derive(Debug, Error)]
#[error("failed to bootstrap table '{table}': {source}")]
pub struct BootstrapError {
    pub table: String,
    #[source]
    pub source: ExecutorError,
}

/// Errors surfaced by the fallible storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("update conflict on key '{key}' after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
}
