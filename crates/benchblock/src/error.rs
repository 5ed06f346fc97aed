//! Error taxonomy for a benchmark run.
//!
//! Startup errors (`Config`, `Connection`, `Deploy`) abort the whole run. The
//! rest are scoped to the task that raised them: a `Submit` error stops one
//! worker, a `Receipt` error is only logged, a `Collection` error stops the
//! collector and a `Storage` error skips a single row.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid or inconsistent configuration.
    #[error("config: {0}")]
    Config(String),

    /// An endpoint could not be reached or resolved.
    #[error("connection: {0}")]
    Connection(String),

    /// The load contract was not deployed.
    #[error("deploy: {0}")]
    Deploy(String),

    /// A transaction was rejected at submission.
    #[error("submit (nonce {nonce}): {reason}")]
    Submit { nonce: u64, reason: String },

    /// A submitted transaction failed on chain or never produced a receipt.
    #[error("receipt: {0}")]
    Receipt(String),

    /// A block could not be fetched.
    #[error("collection: block {block}: {reason}")]
    Collection { block: u64, reason: String },

    /// The block store rejected an operation.
    #[error("storage: {0}")]
    Storage(String),
}

impl BenchError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn connection(msg: impl std::fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    /// True for errors that must abort the run before any worker starts.
    pub const fn is_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connection(_) | Self::Deploy(_))
    }
}

impl From<sqlx::Error> for BenchError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type BenchResult<T> = std::result::Result<T, BenchError>;
