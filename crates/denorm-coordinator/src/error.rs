//! Coordinator error types.

use thiserror::Error;

use denorm_state::StateError;

use crate::broker::BrokerError;
use crate::namespace::NamespaceError;

/// Result type alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to provision topic {topic}: {source}")]
    Provisioning {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to publish generation marker after {attempts} attempts: {source}")]
    MarkerPublish {
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    #[error("acknowledgment check failed at {path}: {source}")]
    Acknowledgment {
        path: String,
        #[source]
        source: NamespaceError,
    },

    #[error("bootstrap batch {job_id} could not be written: {source}")]
    BatchWrite {
        job_id: String,
        #[source]
        source: NamespaceError,
    },

    #[error("rule repository error: {0}")]
    Repository(#[from] StateError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// Whether this error stops the coordinator rather than one cycle.
    ///
    /// Provisioning and acknowledgment failures are fatal. A failed batch
    /// write or repository call only fails the cycle; the affected rules
    /// keep their status and are retried on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Provisioning { .. }
                | CoordinatorError::MarkerPublish { .. }
                | CoordinatorError::Acknowledgment { .. }
        )
    }
}
