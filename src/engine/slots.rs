use chrono::{Datelike, Days};

use crate::calendar::{InstitutionCalendar, WeeklySchedule};
use crate::model::*;

/// Bookable slots over the next `horizon_days` local days starting with the
/// day containing `now`.
///
/// `busy` holds the spans of non-cancelled bookings, sorted by start. Output
/// is strictly increasing, every slot is `SLOT_GRANULARITY_MS` long, lies
/// inside one active window, ends after `now`, and overlaps nothing in `busy`.
/// Days are produced one at a time as the iterator is driven.
pub fn slots<'a>(
    windows: &[WeeklyAvailability],
    busy: &'a [Span],
    horizon_days: u32,
    now: Ms,
    calendar: &'a InstitutionCalendar,
) -> impl Iterator<Item = Span> + 'a {
    let schedules = active_schedules(windows);
    let first = calendar.local_date(now);
    (0..u64::from(horizon_days))
        .map_while(move |offset| first.checked_add_days(Days::new(offset)))
        .flat_map(move |date| {
            let weekday = date.weekday();
            let mut day: Vec<Span> = schedules
                .iter()
                .filter(|s| s.weekday == weekday)
                .flat_map(|s| chunks(s.span_on(calendar, date)))
                .filter(|slot| slot.end > now && !overlaps_any(busy, slot))
                .collect();
            day.sort_unstable();
            day.dedup();
            day
        })
}

/// Schedules of the active windows, in declaration order. Windows whose
/// stored text no longer parses are skipped.
pub(crate) fn active_schedules(windows: &[WeeklyAvailability]) -> Vec<WeeklySchedule> {
    windows
        .iter()
        .filter(|w| w.active)
        .filter_map(|w| match w.schedule() {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(window = %w.id, professor = %w.professor_id, "skipping malformed window: {e}");
                None
            }
        })
        .collect()
}

/// Consecutive full-length slots from the window start; a short tail is dropped.
fn chunks(window: Span) -> impl Iterator<Item = Span> {
    let count = window.duration_ms() / SLOT_GRANULARITY_MS;
    (0..count).map(move |i| {
        let start = window.start + i * SLOT_GRANULARITY_MS;
        Span::new(start, start + SLOT_GRANULARITY_MS)
    })
}

/// `busy` must be sorted by start.
pub(crate) fn overlaps_any(busy: &[Span], span: &Span) -> bool {
    let right = busy.partition_point(|b| b.start < span.end);
    busy[..right].iter().any(|b| b.end > span.start)
}
