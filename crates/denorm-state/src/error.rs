//! Error types for the rule repository.

use thiserror::Error;

use crate::types::RuleStatus;

/// Result type alias for rule repository operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during rule repository operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("rule already exists for table {0}")]
    AlreadyExists(String),

    #[error("status conflict on {table}: expected {expected}, found {actual}")]
    StatusConflict {
        table: String,
        expected: RuleStatus,
        actual: RuleStatus,
    },

    #[error("illegal transition on {table}: {from} -> {to}")]
    IllegalTransition {
        table: String,
        from: RuleStatus,
        to: RuleStatus,
    },
}
