use tokio::sync::oneshot;
use ulid::Ulid;

use crate::directory::{Role, UserRecord};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{
    check_no_overlap, check_resource_free, check_within_availability, checked_span, now_ms,
    validate_instant,
};
use super::lifecycle::{check_resource_transition, check_tutoring_transition};
use super::{Engine, EngineError, IdKind, WalCommand};

fn record_admission<T>(kind: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "admitted",
        Err(e) => e.kind(),
    };
    metrics::counter!(observability::ADMISSIONS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.is_some_and(|v| v.len() > max) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_window(window: &WeeklyAvailability) -> Result<(), EngineError> {
    window.schedule()?;
    if window.subject.trim().is_empty() {
        return Err(EngineError::MissingField("subject"));
    }
    check_text(Some(&window.subject), MAX_SUBJECT_LEN, "subject too long")?;
    check_text(window.location.as_deref(), MAX_LOCATION_LEN, "location too long")
}

fn validate_details(details: &BookingDetails) -> Result<(), EngineError> {
    if details.topic.trim().is_empty() {
        return Err(EngineError::MissingField("topic"));
    }
    check_text(Some(&details.topic), MAX_TOPIC_LEN, "topic too long")?;
    check_text(details.description.as_deref(), MAX_DESCRIPTION_LEN, "description too long")?;
    check_text(details.location.as_deref(), MAX_LOCATION_LEN, "location too long")
}

impl Engine {
    async fn require_user(&self, id: Ulid) -> Result<UserRecord, EngineError> {
        self.directory.get_user(id).await.ok_or(EngineError::NotFound(id))
    }

    async fn require_professor(&self, id: Ulid) -> Result<UserRecord, EngineError> {
        let user = self.require_user(id).await?;
        if user.role != Role::Professor {
            return Err(EngineError::Forbidden("user is not a professor"));
        }
        Ok(user)
    }

    // ── Availability windows ─────────────────────────────────

    pub async fn add_availability(&self, mut window: WeeklyAvailability) -> Result<WeeklyAvailability, EngineError> {
        validate_window(&window)?;
        self.require_professor(window.professor_id).await?;

        let claim = self
            .store
            .claim(IdKind::Window, window.id)
            .ok_or(EngineError::AlreadyExists(window.id))?;
        let calendar = self.store.calendar_or_insert(window.professor_id);
        let locked = self.lock_calendar(calendar).await.holding(claim);
        if locked.windows.len() >= MAX_WINDOWS_PER_PROFESSOR {
            return Err(EngineError::LimitExceeded("too many availability windows"));
        }

        window.active = true;
        let event = Event::AvailabilityAdded { window: window.clone() };
        self.persist_and_apply(locked, event).await?;
        Ok(window)
    }

    /// Replace a window's fields. The professor cannot change.
    pub async fn update_availability(&self, window: WeeklyAvailability) -> Result<WeeklyAvailability, EngineError> {
        validate_window(&window)?;
        let owner = self
            .store
            .owner_of_window(&window.id)
            .ok_or(EngineError::NotFound(window.id))?;
        if owner != window.professor_id {
            return Err(EngineError::Forbidden("window belongs to another professor"));
        }
        let calendar = self.store.calendar(&owner).ok_or(EngineError::NotFound(owner))?;
        let locked = self.lock_calendar(calendar).await;

        let event = Event::AvailabilityUpdated { window: window.clone() };
        self.persist_and_apply(locked, event).await?;
        Ok(window)
    }

    /// Soft delete. Deactivating an inactive window is a no-op.
    pub async fn deactivate_availability(&self, id: Ulid, actor_id: Ulid) -> Result<(), EngineError> {
        let owner = self.store.owner_of_window(&id).ok_or(EngineError::NotFound(id))?;
        if owner != actor_id {
            return Err(EngineError::Forbidden("only the owning professor can remove a window"));
        }
        let calendar = self.store.calendar(&owner).ok_or(EngineError::NotFound(owner))?;
        let locked = self.lock_calendar(calendar).await;
        if !locked.window(id).is_some_and(|w| w.active) {
            return Ok(());
        }

        let event = Event::AvailabilityDeactivated { id, professor_id: owner };
        self.persist_and_apply(locked, event).await
    }

    // ── Admission ────────────────────────────────────────────

    pub async fn admit_tutoring_booking(&self, request: TutoringRequest) -> Result<TutoringBooking, EngineError> {
        let result = self.admit_tutoring(request).await;
        record_admission("tutoring", &result);
        result
    }

    async fn admit_tutoring(&self, request: TutoringRequest) -> Result<TutoringBooking, EngineError> {
        let span = checked_span(request.start, request.end)?;
        validate_details(&request.details)?;
        self.require_professor(request.professor_id).await?;
        self.require_user(request.student_id).await?;

        let calendar = self
            .store
            .calendar(&request.professor_id)
            .ok_or(EngineError::OutsideAvailability)?;
        let claim = self
            .store
            .claim(IdKind::Booking, request.id)
            .ok_or(EngineError::AlreadyExists(request.id))?;
        let locked = self.lock_calendar(calendar).await.holding(claim);
        if locked.bookings.len() >= MAX_BOOKINGS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many bookings for professor"));
        }
        check_within_availability(&locked, &span, &self.config.calendar)?;
        check_no_overlap(&locked, &span, None)?;

        let booking = TutoringBooking {
            id: request.id,
            professor_id: request.professor_id,
            student_id: request.student_id,
            span,
            details: request.details,
            status: BookingStatus::Pending,
            created_at: now_ms(),
        };
        let event = Event::TutoringAdmitted { booking: booking.clone() };
        self.persist_and_apply(locked, event).await?;
        tracing::debug!(booking = %booking.id, professor = %booking.professor_id, "tutoring session admitted");
        Ok(booking)
    }

    pub async fn admit_resource_booking(
        &self,
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        reserved_at: Ms,
    ) -> Result<ResourceBooking, EngineError> {
        let result = self.admit_resource(id, resource_id, user_id, reserved_at).await;
        record_admission("resource", &result);
        result
    }

    async fn admit_resource(
        &self,
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        reserved_at: Ms,
    ) -> Result<ResourceBooking, EngineError> {
        validate_instant(reserved_at)?;
        let resource = self
            .directory
            .get_resource(resource_id)
            .await
            .ok_or(EngineError::NotFound(resource_id))?;
        self.require_user(user_id).await?;
        if !resource.active {
            return Err(EngineError::ResourceInactive(resource_id));
        }

        let claim = self
            .store
            .claim(IdKind::Booking, id)
            .ok_or(EngineError::AlreadyExists(id))?;
        let ledger = self.store.ledger_or_insert(resource_id);
        let locked = self.lock_ledger(ledger).await.holding(claim);
        if locked.bookings.len() >= MAX_BOOKINGS_PER_CALENDAR {
            return Err(EngineError::LimitExceeded("too many reservations for resource"));
        }
        check_resource_free(&locked, reserved_at, self.config.resource_policy, &self.config.calendar)?;

        let booking = ResourceBooking {
            id,
            resource_id,
            user_id,
            reserved_at,
            status: BookingStatus::Confirmed,
            created_at: now_ms(),
        };
        let event = Event::ResourceAdmitted { booking: booking.clone() };
        self.persist_and_apply(locked, event).await?;
        Ok(booking)
    }

    // ── Lifecycle ────────────────────────────────────────────

    pub async fn set_booking_status(
        &self,
        booking_id: Ulid,
        status: BookingStatus,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let owner = self
            .store
            .owner_of_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let updated = match owner {
            BookingOwner::Professor(professor_id) => {
                let calendar = self
                    .store
                    .calendar(&professor_id)
                    .ok_or(EngineError::NotFound(booking_id))?;
                let locked = self.lock_calendar(calendar).await;
                let mut booking = locked
                    .booking(booking_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(booking_id))?;
                check_tutoring_transition(&booking, status, actor_id)?;
                let event = Event::TutoringStatusChanged { id: booking_id, professor_id, status };
                self.persist_and_apply(locked, event).await?;
                booking.status = status;
                Booking::Tutoring(booking)
            }
            BookingOwner::Resource(resource_id) => {
                let ledger = self
                    .store
                    .ledger(&resource_id)
                    .ok_or(EngineError::NotFound(booking_id))?;
                let locked = self.lock_ledger(ledger).await;
                let mut booking = locked
                    .booking(booking_id)
                    .cloned()
                    .ok_or(EngineError::NotFound(booking_id))?;
                check_resource_transition(&booking, status, actor_id)?;
                let event = Event::ResourceStatusChanged { id: booking_id, resource_id, status };
                self.persist_and_apply(locked, event).await?;
                booking.status = status;
                Booking::Resource(booking)
            }
        };
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => status.as_str()).increment(1);
        Ok(updated)
    }

    /// Cancel a tutoring session and admit its replacement as one record.
    /// The replacement keeps the parties and details and starts over as pending.
    pub async fn reschedule_tutoring_booking(
        &self,
        booking_id: Ulid,
        new_id: Ulid,
        actor_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<TutoringBooking, EngineError> {
        let span = checked_span(start, end)?;
        let Some(BookingOwner::Professor(professor_id)) = self.store.owner_of_booking(&booking_id) else {
            return Err(EngineError::NotFound(booking_id));
        };
        let calendar = self
            .store
            .calendar(&professor_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let locked = self.lock_calendar(calendar).await;
        let old = locked
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        check_tutoring_transition(&old, BookingStatus::Cancelled, actor_id)?;
        let claim = self
            .store
            .claim(IdKind::Booking, new_id)
            .ok_or(EngineError::AlreadyExists(new_id))?;
        let locked = locked.holding(claim);
        check_within_availability(&locked, &span, &self.config.calendar)?;
        check_no_overlap(&locked, &span, Some(old.id))?;

        let booking = TutoringBooking {
            id: new_id,
            span,
            status: BookingStatus::Pending,
            created_at: now_ms(),
            ..old
        };
        let event = Event::TutoringRescheduled { cancelled: booking_id, booking: booking.clone() };
        self.persist_and_apply(locked, event).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => "rescheduled").increment(1);
        Ok(booking)
    }

    /// Remove a reservation outright instead of keeping it as cancelled.
    pub async fn delete_resource_booking(&self, booking_id: Ulid, actor_id: Ulid) -> Result<ResourceBooking, EngineError> {
        let Some(BookingOwner::Resource(resource_id)) = self.store.owner_of_booking(&booking_id) else {
            return Err(EngineError::NotFound(booking_id));
        };
        let ledger = self
            .store
            .ledger(&resource_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let locked = self.lock_ledger(ledger).await;
        let booking = locked
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.user_id != actor_id {
            return Err(EngineError::Forbidden("only the reserving user can delete a reservation"));
        }

        let event = Event::ResourceBookingDeleted { id: booking_id, resource_id };
        self.persist_and_apply(locked, event).await?;
        Ok(booking)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one record per live window and booking.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for calendar in self.store.calendars() {
            let cal = calendar.read().await;
            events.extend(cal.windows.iter().map(|w| Event::AvailabilityAdded { window: w.clone() }));
            events.extend(cal.bookings.iter().map(|b| Event::TutoringAdmitted { booking: b.clone() }));
        }
        for ledger in self.store.ledgers() {
            let ledger = ledger.read().await;
            events.extend(ledger.bookings.iter().map(|b| Event::ResourceAdmitted { booking: b.clone() }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::debug!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
