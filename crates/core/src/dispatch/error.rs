//! Error types for the dispatch module.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the queue services.
///
/// Busy and invariant outcomes (counter paused, queue empty, ...) are not
/// errors; they travel as [`crate::queue::Rejection`] values.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unknown ticket, counter or category.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Rejected input before reaching the store.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Sequence allocation kept failing under contention.
    #[error("Sequence allocation failed after {attempts} attempts: {source}")]
    SequenceExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Persistence failure, propagated unchanged.
    #[error(transparent)]
    Store(StoreError),
}

impl DispatchError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns true for caller mistakes (unknown ids, bad input) as opposed
    /// to failures of the system itself.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DispatchError::NotFound { .. }
                | DispatchError::InvalidRequest { .. }
                | DispatchError::Store(StoreError::Conflict(_))
        )
    }

    /// Returns true if the failure is transient (lock contention, deadline).
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::SequenceExhausted { .. } => true,
            DispatchError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => DispatchError::NotFound { entity, id },
            other => DispatchError::Store(other),
        }
    }
}
