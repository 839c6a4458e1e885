use crate::lifecycle::DetectionStatus;
use crate::types::RecordId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: RecordId },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: DetectionStatus,
        to: DetectionStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a [`CoreError::NotFound`] on any id-like value.
    pub fn not_found(entity: &'static str, id: impl Into<RecordId>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
