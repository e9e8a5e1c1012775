//! Error kinds raised by the engine.

use thiserror::Error;

use crate::lock::ResourceId;
use crate::transaction::TransactionId;

pub type ShimmerResult<T> = Result<T, ShimmerError>;

#[derive(Debug, Error)]
pub enum ShimmerError {
    #[error("key already exists: {key:?}")]
    KeyExists { key: Vec<u8> },

    #[error("key not found: {key:?}")]
    NotFound { key: Vec<u8> },

    #[error("no database named {0:?}")]
    InvalidDatabase(String),

    #[error("invalid transaction {0}")]
    InvalidTransaction(TransactionId),

    #[error("transaction {0} is not active")]
    TransactionNotActive(TransactionId),

    #[error("invalid data type for schema {schema}: {reason}")]
    InvalidDataType { schema: String, reason: String },

    #[error("invalid size: expected {expected}, got {actual}")]
    InvalidSize { expected: usize, actual: usize },

    #[error("failed to write snapshot to {path}: {reason}")]
    DiskWriteError { path: String, reason: String },

    #[error("transaction {tx} timed out waiting for a lock on resource {resource}")]
    LockTimeout {
        tx: TransactionId,
        resource: ResourceId,
    },

    #[error("transaction {0} was chosen as the deadlock victim")]
    DeadlockDetected(TransactionId),

    #[error("page {0} is full")]
    PageFull(u64),
}
