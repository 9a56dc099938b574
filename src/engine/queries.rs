use std::time::Instant;

use ulid::Ulid;

use crate::calendar::DAY_MS;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::slots::slots;
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_availability(&self, professor_id: Ulid, include_inactive: bool) -> Vec<WeeklyAvailability> {
        let Some(calendar) = self.store.calendar(&professor_id) else {
            return Vec::new();
        };
        let guard = calendar.read().await;
        guard
            .windows
            .iter()
            .filter(|w| include_inactive || w.active)
            .cloned()
            .collect()
    }

    pub async fn compute_slots(&self, professor_id: Ulid, horizon_days: u32) -> Result<Vec<Span>, EngineError> {
        self.slots_at(professor_id, horizon_days, now_ms()).await
    }

    /// Slot listing as of `now`.
    pub async fn slots_at(&self, professor_id: Ulid, horizon_days: u32, now: Ms) -> Result<Vec<Span>, EngineError> {
        if horizon_days == 0 || horizon_days > MAX_HORIZON_DAYS {
            return Err(EngineError::InvalidHorizon {
                got: horizon_days,
                max: MAX_HORIZON_DAYS,
            });
        }
        let Some(calendar) = self.store.calendar(&professor_id) else {
            return Ok(Vec::new());
        };
        let started = Instant::now();
        let guard = calendar.read().await;

        let first_day = self.config.calendar.day_span(now).start;
        let horizon = Span::new(first_day, first_day + i64::from(horizon_days) * DAY_MS);
        let busy = guard.active_spans(&horizon);
        let result: Vec<Span> = slots(&guard.windows, &busy, horizon_days, now, &self.config.calendar).collect();

        metrics::histogram!(observability::SLOT_COMPUTE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(result)
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        match self.store.owner_of_booking(&booking_id)? {
            BookingOwner::Professor(id) => {
                let calendar = self.store.calendar(&id)?;
                let guard = calendar.read().await;
                guard.booking(booking_id).cloned().map(Booking::Tutoring)
            }
            BookingOwner::Resource(id) => {
                let ledger = self.store.ledger(&id)?;
                let guard = ledger.read().await;
                guard.booking(booking_id).cloned().map(Booking::Resource)
            }
        }
    }

    /// Bookings in scope, ordered by start time.
    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<Booking> {
        let mut found: Vec<Booking> = match filter.scope {
            BookingScope::Professor(id) => match self.store.calendar(&id) {
                Some(calendar) => {
                    let guard = calendar.read().await;
                    guard.bookings.iter().cloned().map(Booking::Tutoring).collect()
                }
                None => Vec::new(),
            },
            BookingScope::Resource(id) => match self.store.ledger(&id) {
                Some(ledger) => {
                    let guard = ledger.read().await;
                    guard.bookings.iter().cloned().map(Booking::Resource).collect()
                }
                None => Vec::new(),
            },
            BookingScope::Student(id) | BookingScope::User(id) => {
                let mut own = Vec::new();
                for booking_id in self.store.bookings_of(&id) {
                    let wanted = matches!(
                        (filter.scope, self.store.owner_of_booking(&booking_id)),
                        (BookingScope::Student(_), Some(BookingOwner::Professor(_)))
                            | (BookingScope::User(_), Some(BookingOwner::Resource(_)))
                    );
                    if wanted && let Some(booking) = self.get_booking(booking_id).await {
                        own.push(booking);
                    }
                }
                own
            }
        };
        found.retain(|b| filter.matches(b));
        found.sort_by_key(|b| (b.starts_at(), b.id()));
        found
    }
}
