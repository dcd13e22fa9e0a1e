use uuid::Uuid;

use crate::types::AlertStatus;

/// Failures surfaced by the alert store and the operator-facing operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),

    #[error("alert {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: AlertStatus,
        to: AlertStatus,
    },

    #[error("invalid request: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),
}

impl AlertError {
    pub fn validation(message: impl Into<String>) -> Self {
        AlertError::Validation(vec![message.into()])
    }
}
