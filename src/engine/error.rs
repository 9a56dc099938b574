use thiserror::Error;
use ulid::Ulid;

use crate::calendar::WindowError;
use crate::model::{BookingStatus, Ms};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval { start: Ms, end: Ms },
    #[error("invalid availability window: {0}")]
    InvalidWindow(#[from] WindowError),
    #[error("horizon must be between 1 and {max} days, got {got}")]
    InvalidHorizon { got: u32, max: u32 },
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("resource {0} is not active")]
    ResourceInactive(Ulid),
    #[error("invalid transition: {} -> {}", from.as_str(), to.as_str())]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("requested interval is outside the professor's availability")]
    OutsideAvailability,
    #[error("slot no longer available: overlaps booking {0}")]
    SlotNoLongerAvailable(Ulid),
    #[error("resource already reserved by booking {0}")]
    AlreadyReserved(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Lost a race against live state; the caller should refresh and pick again.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::SlotNoLongerAvailable(_)
                | EngineError::AlreadyReserved(_)
                | EngineError::OutsideAvailability
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::InvalidWindow(_) => "invalid_window",
            EngineError::InvalidHorizon { .. } => "invalid_horizon",
            EngineError::MissingField(_) => "missing_field",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::ResourceInactive(_) => "resource_inactive",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::OutsideAvailability => "outside_availability",
            EngineError::SlotNoLongerAvailable(_) => "slot_taken",
            EngineError::AlreadyReserved(_) => "already_reserved",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification() {
        assert!(EngineError::SlotNoLongerAvailable(Ulid::new()).is_conflict());
        assert!(EngineError::AlreadyReserved(Ulid::new()).is_conflict());
        assert!(EngineError::OutsideAvailability.is_conflict());
        assert!(!EngineError::InvalidInterval { start: 1, end: 1 }.is_conflict());
        assert!(!EngineError::WalError("disk".into()).is_conflict());
    }

    #[test]
    fn transition_message() {
        let e = EngineError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        };
        assert_eq!(e.to_string(), "invalid transition: cancelled -> confirmed");
    }
}
