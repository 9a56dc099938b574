use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedCalendar = Arc<RwLock<ProfessorCalendar>>;
pub type SharedLedger = Arc<RwLock<ResourceLedger>>;

/// Calendars, ledgers and the id indexes that point into them.
pub struct InMemoryStore {
    calendars: DashMap<Ulid, SharedCalendar>,
    ledgers: DashMap<Ulid, SharedLedger>,
    /// Booking id → calendar or ledger holding it.
    booking_owner: DashMap<Ulid, BookingOwner>,
    /// Window id → professor.
    window_owner: DashMap<Ulid, Ulid>,
    /// Student or reserving user → their booking ids.
    booked_by: DashMap<Ulid, Vec<Ulid>>,
    /// Ids held by admissions that have not committed or failed yet.
    booking_claims: DashSet<Ulid>,
    window_claims: DashSet<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Booking,
    Window,
}

/// Exclusive use of a new id until dropped. Travels with the commit so it is
/// released only after the event is applied and the id is indexed.
pub struct IdClaim {
    store: Arc<InMemoryStore>,
    kind: IdKind,
    id: Ulid,
}

impl Drop for IdClaim {
    fn drop(&mut self) {
        self.store.claims(self.kind).remove(&self.id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            calendars: DashMap::new(),
            ledgers: DashMap::new(),
            booking_owner: DashMap::new(),
            window_owner: DashMap::new(),
            booked_by: DashMap::new(),
            booking_claims: DashSet::new(),
            window_claims: DashSet::new(),
        }
    }

    // ── Calendars and ledgers ────────────────────────────────

    pub fn calendar(&self, professor_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(professor_id).map(|e| e.value().clone())
    }

    pub fn calendar_or_insert(&self, professor_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(professor_id)
            .or_insert_with(|| Arc::new(RwLock::new(ProfessorCalendar::new(professor_id))))
            .value()
            .clone()
    }

    pub fn insert_calendar(&self, calendar: ProfessorCalendar) {
        self.calendars.insert(calendar.professor_id, Arc::new(RwLock::new(calendar)));
    }

    pub fn calendars(&self) -> Vec<SharedCalendar> {
        self.calendars.iter().map(|e| e.value().clone()).collect()
    }

    pub fn ledger(&self, resource_id: &Ulid) -> Option<SharedLedger> {
        self.ledgers.get(resource_id).map(|e| e.value().clone())
    }

    pub fn ledger_or_insert(&self, resource_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceLedger::new(resource_id))))
            .value()
            .clone()
    }

    pub fn insert_ledger(&self, ledger: ResourceLedger) {
        self.ledgers.insert(ledger.resource_id, Arc::new(RwLock::new(ledger)));
    }

    pub fn ledgers(&self) -> Vec<SharedLedger> {
        self.ledgers.iter().map(|e| e.value().clone()).collect()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn owner_of_booking(&self, booking_id: &Ulid) -> Option<BookingOwner> {
        self.booking_owner.get(booking_id).map(|e| *e.value())
    }

    pub fn owner_of_window(&self, window_id: &Ulid) -> Option<Ulid> {
        self.window_owner.get(window_id).map(|e| *e.value())
    }

    pub fn bookings_of(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.booked_by
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn claims(&self, kind: IdKind) -> &DashSet<Ulid> {
        match kind {
            IdKind::Booking => &self.booking_claims,
            IdKind::Window => &self.window_claims,
        }
    }

    fn is_indexed(&self, kind: IdKind, id: &Ulid) -> bool {
        match kind {
            IdKind::Booking => self.booking_owner.contains_key(id),
            IdKind::Window => self.window_owner.contains_key(id),
        }
    }

    /// Reserve an unused id across every calendar and ledger. `None` when the
    /// id is committed already or another admission holds it.
    pub fn claim(self: &Arc<Self>, kind: IdKind, id: Ulid) -> Option<IdClaim> {
        if self.is_indexed(kind, &id) || !self.claims(kind).insert(id) {
            return None;
        }
        let claim = IdClaim {
            store: self.clone(),
            kind,
            id,
        };
        // A holder indexes before releasing, so a commit that finished after
        // the first check is visible here.
        if self.is_indexed(kind, &id) {
            return None;
        }
        Some(claim)
    }

    fn index_booking(&self, booking_id: Ulid, owner: BookingOwner, booker: Ulid) {
        self.booking_owner.insert(booking_id, owner);
        self.booked_by.entry(booker).or_default().push(booking_id);
    }

    fn unindex_booking(&self, booking_id: &Ulid, booker: &Ulid) {
        self.booking_owner.remove(booking_id);
        if let Some(mut ids) = self.booked_by.get_mut(booker) {
            ids.retain(|id| id != booking_id);
        }
    }
}

/// Applies a committed event to the state it belongs to. The caller holds
/// the state's write lock (or owns it outright during replay).
pub trait Apply {
    fn apply(&mut self, event: &Event, store: &InMemoryStore);
}

impl Apply for ProfessorCalendar {
    fn apply(&mut self, event: &Event, store: &InMemoryStore) {
        match event {
            Event::AvailabilityAdded { window } | Event::AvailabilityUpdated { window } => {
                store.window_owner.insert(window.id, window.professor_id);
                self.upsert_window(window.clone());
            }
            Event::AvailabilityDeactivated { id, .. } => {
                if let Some(w) = self.windows.iter_mut().find(|w| w.id == *id) {
                    w.active = false;
                }
            }
            Event::TutoringAdmitted { booking } => {
                store.index_booking(booking.id, BookingOwner::Professor(self.professor_id), booking.student_id);
                self.insert_booking(booking.clone());
            }
            Event::TutoringStatusChanged { id, status, .. } => {
                if let Some(b) = self.booking_mut(*id) {
                    b.status = *status;
                }
            }
            Event::TutoringRescheduled { cancelled, booking } => {
                if let Some(old) = self.booking_mut(*cancelled) {
                    old.status = BookingStatus::Cancelled;
                }
                store.index_booking(booking.id, BookingOwner::Professor(self.professor_id), booking.student_id);
                self.insert_booking(booking.clone());
            }
            Event::ResourceAdmitted { .. }
            | Event::ResourceStatusChanged { .. }
            | Event::ResourceBookingDeleted { .. } => {}
        }
    }
}

impl Apply for ResourceLedger {
    fn apply(&mut self, event: &Event, store: &InMemoryStore) {
        match event {
            Event::ResourceAdmitted { booking } => {
                store.index_booking(booking.id, BookingOwner::Resource(self.resource_id), booking.user_id);
                self.insert_booking(booking.clone());
            }
            Event::ResourceStatusChanged { id, status, .. } => {
                if let Some(b) = self.booking_mut(*id) {
                    b.status = *status;
                }
            }
            Event::ResourceBookingDeleted { id, .. } => {
                if let Some(removed) = self.remove_booking(*id) {
                    store.unindex_booking(&removed.id, &removed.user_id);
                }
            }
            Event::AvailabilityAdded { .. }
            | Event::AvailabilityUpdated { .. }
            | Event::AvailabilityDeactivated { .. }
            | Event::TutoringAdmitted { .. }
            | Event::TutoringStatusChanged { .. }
            | Event::TutoringRescheduled { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(resource_id: Ulid, user_id: Ulid) -> ResourceBooking {
        ResourceBooking {
            id: Ulid::new(),
            resource_id,
            user_id,
            reserved_at: 1_000,
            status: BookingStatus::Confirmed,
            created_at: 0,
        }
    }

    #[test]
    fn ledger_apply_maintains_indexes() {
        let store = InMemoryStore::new();
        let rid = Ulid::new();
        let user = Ulid::new();
        let mut ledger = ResourceLedger::new(rid);
        let booking = reservation(rid, user);

        ledger.apply(&Event::ResourceAdmitted { booking: booking.clone() }, &store);
        assert_eq!(store.owner_of_booking(&booking.id), Some(BookingOwner::Resource(rid)));
        assert_eq!(store.bookings_of(&user), vec![booking.id]);

        ledger.apply(&Event::ResourceBookingDeleted { id: booking.id, resource_id: rid }, &store);
        assert!(ledger.bookings.is_empty());
        assert_eq!(store.owner_of_booking(&booking.id), None);
        assert!(store.bookings_of(&user).is_empty());
    }

    #[test]
    fn reschedule_cancels_old_and_indexes_new() {
        let store = InMemoryStore::new();
        let prof = Ulid::new();
        let student = Ulid::new();
        let mut cal = ProfessorCalendar::new(prof);
        let old = TutoringBooking {
            id: Ulid::new(),
            professor_id: prof,
            student_id: student,
            span: Span::new(1_000, 2_000),
            details: BookingDetails::new("proofs"),
            status: BookingStatus::Confirmed,
            created_at: 0,
        };
        let new = TutoringBooking {
            id: Ulid::new(),
            span: Span::new(3_000, 4_000),
            status: BookingStatus::Pending,
            ..old.clone()
        };
        cal.apply(&Event::TutoringAdmitted { booking: old.clone() }, &store);
        cal.apply(&Event::TutoringRescheduled { cancelled: old.id, booking: new.clone() }, &store);

        assert_eq!(cal.booking(old.id).map(|b| b.status), Some(BookingStatus::Cancelled));
        assert_eq!(cal.booking(new.id).map(|b| b.status), Some(BookingStatus::Pending));
        assert_eq!(store.bookings_of(&student), vec![old.id, new.id]);
        assert_eq!(store.owner_of_booking(&new.id), Some(BookingOwner::Professor(prof)));
    }

    #[test]
    fn claims_are_exclusive_until_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let id = Ulid::new();

        let claim = store.claim(IdKind::Booking, id).unwrap();
        assert!(store.claim(IdKind::Booking, id).is_none());
        assert!(store.claim(IdKind::Window, id).is_some());
        drop(claim);
        assert!(store.claim(IdKind::Booking, id).is_some());
    }

    #[test]
    fn committed_ids_cannot_be_claimed() {
        let store = Arc::new(InMemoryStore::new());
        let mut ledger = ResourceLedger::new(Ulid::new());
        let booking = reservation(ledger.resource_id, Ulid::new());
        ledger.apply(&Event::ResourceAdmitted { booking: booking.clone() }, &store);

        assert!(store.claim(IdKind::Booking, booking.id).is_none());
    }

    #[test]
    fn calendar_or_insert_is_stable() {
        let store = InMemoryStore::new();
        let prof = Ulid::new();
        let a = store.calendar_or_insert(prof);
        let b = store.calendar_or_insert(prof);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.calendar(&Ulid::new()).is_none());
    }
}
