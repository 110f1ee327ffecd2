//! Error types for shardload

use std::time::Duration;
use thiserror::Error;

/// Result type alias for shardload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Directory / bring-up errors (fatal at init)
    #[error("Shard directory error: {0}")]
    Directory(String),

    #[error("Invalid credential for shard {shard}: {reason}")]
    Credential { shard: String, reason: String },

    #[error("Connection to shard {shard} failed: {reason}")]
    Connection { shard: String, reason: String },

    #[error("Account query on shard {shard} failed after {attempts} attempts: {reason}")]
    AccountQuery {
        shard: String,
        attempts: u32,
        reason: String,
    },

    #[error("Unknown shard: {0}")]
    UnknownShard(String),

    #[error("No shards available: {0}")]
    NoShards(String),

    #[error("Shard {0} is disconnected")]
    Disconnected(String),

    // Transaction errors
    #[error("Broadcast to shard {shard} rejected (code {code}): {log}")]
    BroadcastRejected { shard: String, code: u32, log: String },

    #[error("Transaction {hash} failed with code {code}: {log}")]
    TxFailed { hash: String, code: u32, log: String },

    #[error("Batch on shard {shard} failed: {failed}/{total} transactions not confirmed ({reason})")]
    BatchFailed {
        shard: String,
        failed: usize,
        total: usize,
        reason: String,
    },

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Operation timed out after {elapsed:?}: {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // Allocation errors
    #[error("Allocation gave up after {waited_ms} ms: no shard below the mempool ceiling of {ceiling_bytes} bytes")]
    AllocationTimeout { waited_ms: u64, ceiling_bytes: u64 },

    // Manifest / download errors
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Incomplete download: fetched {fetched} of {expected} fragments")]
    IncompleteDownload { fetched: usize, expected: usize },

    #[error("Verification failed: {0}")]
    Verification(String),

    // Encoding errors
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report error: {0}")]
    Report(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that abort a whole run rather than a single task
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidConfig(_)
                | Error::Directory(_)
                | Error::Credential { .. }
                | Error::AccountQuery { .. }
        )
    }

    /// Transient network conditions worth retrying during connection bring-up
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Report(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Directory("gone".into()).is_fatal());
        assert!(Error::Credential {
            shard: "data-0".into(),
            reason: "empty".into()
        }
        .is_fatal());
        assert!(!Error::IncompleteDownload {
            fetched: 1,
            expected: 2
        }
        .is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        let conn = Error::Connection {
            shard: "data-0".into(),
            reason: "refused".into(),
        };
        assert!(conn.is_retryable());
        assert!(!Error::Manifest("bad".into()).is_retryable());
    }
}
