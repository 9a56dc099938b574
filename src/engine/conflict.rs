use chrono::Datelike;
use ulid::Ulid;

use crate::calendar::InstitutionCalendar;
use crate::model::*;

use super::slots::active_schedules;
use super::{EngineError, ResourceConflictPolicy};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Reject empty/inverted intervals before anything else is looked at.
pub(crate) fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidInterval { start, end })?;
    validate_span(&span)?;
    Ok(span)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SESSION_MS {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    Ok(())
}

pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Some single active window must cover the whole span on its local date.
pub(crate) fn check_within_availability(
    cal: &ProfessorCalendar,
    span: &Span,
    calendar: &InstitutionCalendar,
) -> Result<(), EngineError> {
    let date = calendar.local_date(span.start);
    let covered = active_schedules(&cal.windows)
        .iter()
        .filter(|s| s.weekday == date.weekday())
        .any(|s| s.span_on(calendar, date).contains_span(span));
    if covered {
        Ok(())
    } else {
        Err(EngineError::OutsideAvailability)
    }
}

/// First non-cancelled booking overlapping `span`, ignoring `replacing`.
pub(crate) fn check_no_overlap(
    cal: &ProfessorCalendar,
    span: &Span,
    replacing: Option<Ulid>,
) -> Result<(), EngineError> {
    match cal
        .overlapping(span)
        .find(|b| b.status.is_active() && Some(b.id) != replacing)
    {
        Some(existing) => Err(EngineError::SlotNoLongerAvailable(existing.id)),
        None => Ok(()),
    }
}

/// The interval a reservation at `reserved_at` claims on its resource.
pub(crate) fn conflict_window(
    policy: ResourceConflictPolicy,
    calendar: &InstitutionCalendar,
    reserved_at: Ms,
) -> Span {
    match policy {
        ResourceConflictPolicy::CalendarDay => calendar.day_span(reserved_at),
        ResourceConflictPolicy::FixedDuration(ms) => Span::new(reserved_at, reserved_at + ms.max(1)),
    }
}

pub(crate) fn check_resource_free(
    ledger: &ResourceLedger,
    reserved_at: Ms,
    policy: ResourceConflictPolicy,
    calendar: &InstitutionCalendar,
) -> Result<(), EngineError> {
    let wanted = conflict_window(policy, calendar, reserved_at);
    match ledger.bookings.iter().find(|b| {
        b.status.is_active() && conflict_window(policy, calendar, b.reserved_at).overlaps(&wanted)
    }) {
        Some(existing) => Err(EngineError::AlreadyReserved(existing.id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    /// Monday 2025-12-01T00:00:00Z
    const MONDAY: Ms = 1_764_547_200_000;

    fn calendar_with_window() -> ProfessorCalendar {
        let prof = Ulid::new();
        let mut cal = ProfessorCalendar::new(prof);
        cal.upsert_window(WeeklyAvailability {
            id: Ulid::new(),
            professor_id: prof,
            subject: "Chemistry".into(),
            modality: Modality::Online,
            location: None,
            day_of_week: "monday".into(),
            start_time: "09:00".into(),
            end_time: "11:00".into(),
            active: true,
        });
        cal
    }

    fn reservation(reserved_at: Ms, status: BookingStatus) -> ResourceBooking {
        ResourceBooking {
            id: Ulid::new(),
            resource_id: Ulid::nil(),
            user_id: Ulid::new(),
            reserved_at,
            status,
            created_at: 0,
        }
    }

    #[test]
    fn checked_span_rejects_empty() {
        assert!(matches!(
            checked_span(MONDAY, MONDAY),
            Err(EngineError::InvalidInterval { .. })
        ));
        assert!(matches!(checked_span(10, 20), Err(EngineError::LimitExceeded(_))));
        assert!(checked_span(MONDAY, MONDAY + H).is_ok());
    }

    #[test]
    fn availability_coverage() {
        let cal = calendar_with_window();
        let utc = InstitutionCalendar::utc();
        assert!(check_within_availability(&cal, &Span::new(MONDAY + 9 * H, MONDAY + 11 * H), &utc).is_ok());
        assert!(matches!(
            check_within_availability(&cal, &Span::new(MONDAY + 10 * H, MONDAY + 12 * H), &utc),
            Err(EngineError::OutsideAvailability)
        ));
        // Tuesday has no window.
        let tuesday = MONDAY + 24 * H;
        assert!(check_within_availability(&cal, &Span::new(tuesday + 9 * H, tuesday + 10 * H), &utc).is_err());
    }

    #[test]
    fn coverage_needs_a_single_window() {
        let mut cal = calendar_with_window();
        let mut second = cal.windows[0].clone();
        second.id = Ulid::new();
        second.start_time = "11:00".into();
        second.end_time = "12:00".into();
        cal.upsert_window(second);
        let straddling = Span::new(MONDAY + 10 * H, MONDAY + 12 * H);
        assert!(check_within_availability(&cal, &straddling, &InstitutionCalendar::utc()).is_err());
    }

    #[test]
    fn day_policy_conflicts_same_day_only() {
        let mut ledger = ResourceLedger::new(Ulid::nil());
        let existing = reservation(MONDAY + 9 * H, BookingStatus::Confirmed);
        ledger.insert_booking(existing.clone());
        let utc = InstitutionCalendar::utc();
        let day = ResourceConflictPolicy::CalendarDay;
        assert!(matches!(
            check_resource_free(&ledger, MONDAY + 15 * H, day, &utc),
            Err(EngineError::AlreadyReserved(id)) if id == existing.id
        ));
        assert!(check_resource_free(&ledger, MONDAY + 24 * H, day, &utc).is_ok());
        assert!(check_resource_free(&ledger, MONDAY - 1, day, &utc).is_ok());
    }

    #[test]
    fn cancelled_reservation_frees_day() {
        let mut ledger = ResourceLedger::new(Ulid::nil());
        ledger.insert_booking(reservation(MONDAY + 9 * H, BookingStatus::Cancelled));
        let utc = InstitutionCalendar::utc();
        assert!(check_resource_free(&ledger, MONDAY + 9 * H, ResourceConflictPolicy::CalendarDay, &utc).is_ok());
    }

    #[test]
    fn fixed_duration_policy() {
        let mut ledger = ResourceLedger::new(Ulid::nil());
        ledger.insert_booking(reservation(MONDAY + 9 * H, BookingStatus::Confirmed));
        let utc = InstitutionCalendar::utc();
        let hour = ResourceConflictPolicy::FixedDuration(H);
        assert!(check_resource_free(&ledger, MONDAY + 9 * H + H / 2, hour, &utc).is_err());
        assert!(check_resource_free(&ledger, MONDAY + 10 * H, hour, &utc).is_ok());
        assert!(check_resource_free(&ledger, MONDAY + 8 * H, hour, &utc).is_ok());
    }
}
