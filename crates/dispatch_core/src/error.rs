//! Error taxonomy shared by every dispatch operation.

use thiserror::Error;

use crate::booking::{BookingEvent, BookingStatus};

/// Errors surfaced at the boundary of every public dispatch operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Malformed or missing input (bad coordinates, non-future scheduled time, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The acting user is not a party to the booking.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Lost a race for a resource (driver already bound, booking changed underneath).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no driver available within {radius_m} m")]
    NoDriverAvailable { radius_m: f64 },

    #[error("cannot apply {event} to a booking in state {from}")]
    InvalidTransition {
        from: BookingStatus,
        event: BookingEvent,
    },

    /// Backing store or cache failure.
    #[error("store failure: {0}")]
    Store(String),
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Only resource races are worth retrying against another candidate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Short machine-readable kind, used in API bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::NoDriverAvailable { .. } => "no_driver_available",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Store(_) => "store",
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DispatchError::conflict("driver taken").is_retryable());
        assert!(!DispatchError::validation("bad lat").is_retryable());
        assert!(!DispatchError::NoDriverAvailable { radius_m: 10.0 }.is_retryable());
        assert!(!DispatchError::store("down").is_retryable());
    }

    #[test]
    fn invalid_transition_message_names_state_and_event() {
        let err = DispatchError::InvalidTransition {
            from: BookingStatus::Completed,
            event: BookingEvent::Cancel,
        };
        assert_eq!(
            err.to_string(),
            "cannot apply cancel to a booking in state completed"
        );
    }
}
