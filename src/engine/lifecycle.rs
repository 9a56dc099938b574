use ulid::Ulid;

use crate::model::BookingStatus::*;
use crate::model::*;

use super::EngineError;

/// Edges of the tutoring state machine. Cancelled is terminal.
pub(crate) fn tutoring_edge(from: BookingStatus, to: BookingStatus) -> bool {
    matches!((from, to), (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled))
}

/// Resource reservations are born confirmed and can only be cancelled.
pub(crate) fn resource_edge(from: BookingStatus, to: BookingStatus) -> bool {
    matches!((from, to), (Confirmed, Cancelled))
}

pub(crate) fn check_tutoring_transition(
    booking: &TutoringBooking,
    to: BookingStatus,
    actor: Ulid,
) -> Result<(), EngineError> {
    if !tutoring_edge(booking.status, to) {
        return Err(EngineError::InvalidTransition { from: booking.status, to });
    }
    let allowed = match to {
        Confirmed => actor == booking.professor_id,
        Cancelled => actor == booking.professor_id || actor == booking.student_id,
        Pending => false,
    };
    if !allowed {
        return Err(EngineError::Forbidden(match to {
            Confirmed => "only the professor can confirm a tutoring session",
            _ => "only the professor or the student can cancel a tutoring session",
        }));
    }
    Ok(())
}

pub(crate) fn check_resource_transition(
    booking: &ResourceBooking,
    to: BookingStatus,
    actor: Ulid,
) -> Result<(), EngineError> {
    if !resource_edge(booking.status, to) {
        return Err(EngineError::InvalidTransition { from: booking.status, to });
    }
    if actor != booking.user_id {
        return Err(EngineError::Forbidden("only the reserving user can cancel a reservation"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(status: BookingStatus) -> TutoringBooking {
        TutoringBooking {
            id: Ulid::new(),
            professor_id: Ulid::new(),
            student_id: Ulid::new(),
            span: Span::new(1_000, 2_000),
            details: BookingDetails::new("recursion"),
            status,
            created_at: 0,
        }
    }

    #[test]
    fn tutoring_table() {
        let all = [Pending, Confirmed, Cancelled];
        let allowed: Vec<_> = all
            .iter()
            .flat_map(|&f| all.iter().map(move |&t| (f, t)))
            .filter(|&(f, t)| tutoring_edge(f, t))
            .collect();
        assert_eq!(allowed, vec![(Pending, Confirmed), (Pending, Cancelled), (Confirmed, Cancelled)]);
    }

    #[test]
    fn resource_table() {
        assert!(resource_edge(Confirmed, Cancelled));
        assert!(!resource_edge(Cancelled, Confirmed));
        assert!(!resource_edge(Confirmed, Confirmed));
        assert!(!resource_edge(Pending, Confirmed));
    }

    #[test]
    fn only_professor_confirms() {
        let b = session(Pending);
        assert!(check_tutoring_transition(&b, Confirmed, b.professor_id).is_ok());
        assert!(matches!(
            check_tutoring_transition(&b, Confirmed, b.student_id),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn either_party_cancels() {
        let b = session(Confirmed);
        assert!(check_tutoring_transition(&b, Cancelled, b.professor_id).is_ok());
        assert!(check_tutoring_transition(&b, Cancelled, b.student_id).is_ok());
        assert!(matches!(
            check_tutoring_transition(&b, Cancelled, Ulid::new()),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn same_status_is_invalid() {
        let b = session(Confirmed);
        assert!(matches!(
            check_tutoring_transition(&b, Confirmed, b.professor_id),
            Err(EngineError::InvalidTransition { from: Confirmed, to: Confirmed })
        ));
    }

    #[test]
    fn cancelled_is_terminal() {
        let b = session(Cancelled);
        for to in [Pending, Confirmed, Cancelled] {
            assert!(matches!(
                check_tutoring_transition(&b, to, b.professor_id),
                Err(EngineError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn resource_cancel_by_owner_only() {
        let r = ResourceBooking {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            user_id: Ulid::new(),
            reserved_at: 0,
            status: Confirmed,
            created_at: 0,
        };
        assert!(check_resource_transition(&r, Cancelled, r.user_id).is_ok());
        assert!(matches!(
            check_resource_transition(&r, Cancelled, Ulid::new()),
            Err(EngineError::Forbidden(_))
        ));
    }
}
