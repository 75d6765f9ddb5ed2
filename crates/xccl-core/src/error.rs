//! Error types for communicator bootstrap

use thiserror::Error;

/// Result type alias using the bootstrap Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for communicator bootstrap
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid unique ID exchange method '{method}' (rank {rank}, comm '{comm}')")]
    InvalidExchangeMethod {
        method: String,
        rank: u32,
        comm: String,
    },

    #[error(
        "No way to exchange unique ID (rank {rank}, comm '{comm}'): \
         supply a store or set MASTER_ADDR and MASTER_PORT"
    )]
    NoExchangeMethod { rank: u32, comm: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Unique ID exchange errors
    #[error(
        "Invalid XCCL unique ID size under key '{key}': expected {expected} bytes, got {actual} \
         (rank {rank}, comm '{comm}')"
    )]
    InvalidUniqueIdSize {
        key: String,
        expected: usize,
        actual: usize,
        rank: u32,
        comm: String,
    },

    #[error("Unique ID exchange failed on key '{key}' (rank {rank}, comm '{comm}'): {source}")]
    Exchange {
        key: String,
        rank: u32,
        comm: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to create rendezvous store for comm '{comm}' (rank {rank}): {source}")]
    StoreAcquire {
        rank: u32,
        comm: String,
        #[source]
        source: Box<Error>,
    },

    // Backend errors
    #[error("Failed to get XCCL unique ID (rank {rank}, comm '{comm}'): {message}")]
    UniqueIdGeneration {
        rank: u32,
        comm: String,
        message: String,
    },

    #[error("Failed to initialize XCCL communicator '{comm}' (rank {rank} of {size}): {message}")]
    CommInit {
        rank: u32,
        size: u32,
        comm: String,
        message: String,
    },

    #[error("Invalid value '{value}' for hint '{key}' (rank {rank}, comm '{comm}'): {reason}")]
    HintParse {
        key: String,
        value: String,
        rank: u32,
        comm: String,
        reason: String,
    },

    // Device errors
    #[error("{context}: {message}")]
    Device { context: String, message: String },

    // Store errors
    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Store unavailable: {address}")]
    StoreUnavailable { address: String },

    #[error("Store timeout waiting for key '{key}' after {timeout_ms}ms")]
    StoreTimeout { key: String, timeout_ms: u64 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error is retryable at the transport level
    ///
    /// The bootstrap coordinator never retries on its own; this is for
    /// store clients and for callers that restart a whole rendezvous.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable { .. } | Error::StoreTimeout { .. } | Error::Io(_)
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Exchange { source, .. } | Error::StoreAcquire { source, .. } => {
                source.is_fatal()
            }
            Error::InvalidUniqueIdSize { .. }
            | Error::UniqueIdGeneration { .. }
            | Error::CommInit { .. }
            | Error::Device { .. }
            | Error::InvalidConfig { .. }
            | Error::Internal { .. } => true,
            _ => false,
        }
    }
}
