//! Resource store and provider error types

use thiserror::Error;

/// Errors raised by the resource store, the state machine engine and the
/// compute/network provider seams.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Illegal transition: event {event} is not allowed in state {state}")]
    IllegalTransition { state: String, event: String },

    #[error("Concurrent modification of {kind} {id}: expected state {expected}, found {actual}")]
    ConcurrentModification {
        kind: &'static str,
        id: u64,
        expected: String,
        actual: String,
    },

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Concurrent operation in progress: {0}")]
    ConcurrentOperation(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        CloudError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Transient infrastructure failures that a caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::ResourceUnavailable(_) | CloudError::ConcurrentOperation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
