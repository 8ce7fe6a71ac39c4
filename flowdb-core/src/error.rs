//! Error types for FlowDB

use thiserror::Error;

/// Result type alias for FlowDB operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// FlowDB error types
#[derive(Error, Debug)]
pub enum FlowError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A block with the given timestamp already exists in the file
    #[error("Block with timestamp {0} already exists")]
    BlockExists(i64),

    /// No block with the given timestamp exists in the file
    #[error("Block with timestamp {0} not found")]
    BlockNotFound(i64),

    /// All block slots of the file are occupied
    #[error("Block file is full")]
    StoreFull,

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Conditional expression could not be compiled
    #[error("Conditional error: {0}")]
    Conditional(String),

    /// Hostname resolution failed or timed out
    #[error("Resolution error: {0}")]
    Resolve(String),

    /// Query construction or execution error
    #[error("Query error: {0}")]
    Query(String),

    /// Summary lock could not be acquired within the timeout
    #[error("Failed to acquire database summary lock file")]
    LockTimeout,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Check if error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, FlowError::Corruption(_))
    }

    /// Check if error was detected before any I/O happened
    pub fn is_compile_error(&self) -> bool {
        matches!(self, FlowError::Conditional(_) | FlowError::Resolve(_))
    }
}
