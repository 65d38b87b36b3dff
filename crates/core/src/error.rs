//! Error kinds shared by stores, the engine and the facades.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failures reported by a [`ResourceStore`](crate::ResourceStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Stale resourceVersion on write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("cancelled")]
    Cancelled,
    #[error("api error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }
    pub fn is_conflict(&self) -> bool { matches!(self, StoreError::Conflict(_)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteOp::Create => "create",
            WriteOp::Update => "update",
            WriteOp::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Outcome errors of reconcile/delete runs. Cloneable so the same value can ride
/// on a `Failed` status entry and still be returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum OperatorError {
    /// Get/List failed with anything other than not-found.
    #[error("fetching {name}: {source}")]
    Fetch { name: String, source: StoreError },
    /// Create/Update/Delete failed. Exhausted conflict retries land here too.
    #[error("{op} {name} failed after {attempts} attempt(s): {source}")]
    Write { name: String, op: WriteOp, attempts: u32, source: StoreError },
    #[error("no owner reference of kind {kind}")]
    OwnerNotResolved { kind: String },
    /// A callback returned an error or panicked.
    #[error("callback: {0}")]
    Callback(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl OperatorError {
    pub fn fetch(name: &str, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled => OperatorError::Cancelled,
            source => OperatorError::Fetch { name: name.to_string(), source },
        }
    }

    pub fn write(name: &str, op: WriteOp, attempts: u32, source: StoreError) -> Self {
        match source {
            StoreError::Cancelled => OperatorError::Cancelled,
            source => OperatorError::Write { name: name.to_string(), op, attempts, source },
        }
    }

    /// The underlying store failure, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            OperatorError::Fetch { source, .. } | OperatorError::Write { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type OperatorResult<T> = Result<T, OperatorError>;
