use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{WeeklySchedule, WindowError};

/// Unix milliseconds. Every instant in the engine uses this.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Every generated slot is exactly this long.
pub const SLOT_GRANULARITY_MS: Ms = 30 * MINUTE_MS;

pub const DEFAULT_HORIZON_DAYS: u32 = 14;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied bounds.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modality {
    InPerson,
    Online,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::InPerson => "in_person",
            Modality::Online => "online",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "in_person" | "in-person" | "presencial" => Some(Modality::InPerson),
            "online" => Some(Modality::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "pendiente" => Some(BookingStatus::Pending),
            "confirmed" | "confirmada" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" | "cancelada" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether a booking in this status still occupies its interval.
    pub fn is_active(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }
}

/// A professor's recurring weekly window. Day and times are kept as authored
/// and interpreted on the institution's wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    pub id: Ulid,
    pub professor_id: Ulid,
    pub subject: String,
    pub modality: Modality,
    pub location: Option<String>,
    pub day_of_week: String,
    pub start_time: String,
    pub end_time: String,
    pub active: bool,
}

impl WeeklyAvailability {
    pub fn schedule(&self) -> Result<WeeklySchedule, WindowError> {
        WeeklySchedule::parse(&self.day_of_week, &self.start_time, &self.end_time)
    }
}

/// Free-form fields supplied with a tutoring request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub topic: String,
    pub description: Option<String>,
    pub modality: Modality,
    pub location: Option<String>,
}

impl BookingDetails {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            description: None,
            modality: Modality::InPerson,
            location: None,
        }
    }
}

/// A student's request for a tutoring session, before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutoringRequest {
    pub id: Ulid,
    pub professor_id: Ulid,
    pub student_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub details: BookingDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutoringBooking {
    pub id: Ulid,
    pub professor_id: Ulid,
    pub student_id: Ulid,
    pub span: Span,
    pub details: BookingDetails,
    pub status: BookingStatus,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBooking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub user_id: Ulid,
    pub reserved_at: Ms,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// Both booking shapes, as returned by lookups and lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Booking {
    Tutoring(TutoringBooking),
    Resource(ResourceBooking),
}

impl Booking {
    pub fn id(&self) -> Ulid {
        match self {
            Booking::Tutoring(b) => b.id,
            Booking::Resource(b) => b.id,
        }
    }

    pub fn status(&self) -> BookingStatus {
        match self {
            Booking::Tutoring(b) => b.status,
            Booking::Resource(b) => b.status,
        }
    }

    pub fn starts_at(&self) -> Ms {
        match self {
            Booking::Tutoring(b) => b.span.start,
            Booking::Resource(b) => b.reserved_at,
        }
    }
}

/// Which calendar a booking id lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingOwner {
    Professor(Ulid),
    Resource(Ulid),
}

/// All windows and tutoring bookings of one professor.
#[derive(Debug, Clone)]
pub struct ProfessorCalendar {
    pub professor_id: Ulid,
    /// Declaration order; slot tie-breaks follow it.
    pub windows: Vec<WeeklyAvailability>,
    /// Sorted by `span.start`, cancelled ones included.
    pub bookings: Vec<TutoringBooking>,
}

impl ProfessorCalendar {
    pub fn new(professor_id: Ulid) -> Self {
        Self {
            professor_id,
            windows: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn upsert_window(&mut self, window: WeeklyAvailability) {
        match self.windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => *existing = window,
            None => self.windows.push(window),
        }
    }

    pub fn window(&self, id: Ulid) -> Option<&WeeklyAvailability> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: TutoringBooking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&TutoringBooking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut TutoringBooking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &TutoringBooking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Spans of non-cancelled bookings overlapping `query`, sorted by start.
    pub fn active_spans(&self, query: &Span) -> Vec<Span> {
        self.overlapping(query)
            .filter(|b| b.status.is_active())
            .map(|b| b.span)
            .collect()
    }
}

/// All reservations of one shared resource.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    pub resource_id: Ulid,
    /// Sorted by `reserved_at`, cancelled ones included.
    pub bookings: Vec<ResourceBooking>,
}

impl ResourceLedger {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            bookings: Vec::new(),
        }
    }

    pub fn insert_booking(&mut self, booking: ResourceBooking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.reserved_at, |b| b.reserved_at)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&ResourceBooking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut ResourceBooking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<ResourceBooking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}

/// Committed changes. Each variant is one WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AvailabilityAdded {
        window: WeeklyAvailability,
    },
    AvailabilityUpdated {
        window: WeeklyAvailability,
    },
    AvailabilityDeactivated {
        id: Ulid,
        professor_id: Ulid,
    },
    TutoringAdmitted {
        booking: TutoringBooking,
    },
    TutoringStatusChanged {
        id: Ulid,
        professor_id: Ulid,
        status: BookingStatus,
    },
    /// Cancels `cancelled` and admits `booking` as one record.
    TutoringRescheduled {
        cancelled: Ulid,
        booking: TutoringBooking,
    },
    ResourceAdmitted {
        booking: ResourceBooking,
    },
    ResourceStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: BookingStatus,
    },
    ResourceBookingDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    /// The professor or resource whose calendar this event changes.
    pub fn owner(&self) -> BookingOwner {
        match self {
            Event::AvailabilityAdded { window } | Event::AvailabilityUpdated { window } => {
                BookingOwner::Professor(window.professor_id)
            }
            Event::AvailabilityDeactivated { professor_id, .. }
            | Event::TutoringStatusChanged { professor_id, .. } => BookingOwner::Professor(*professor_id),
            Event::TutoringAdmitted { booking } | Event::TutoringRescheduled { booking, .. } => {
                BookingOwner::Professor(booking.professor_id)
            }
            Event::ResourceAdmitted { booking } => BookingOwner::Resource(booking.resource_id),
            Event::ResourceStatusChanged { resource_id, .. }
            | Event::ResourceBookingDeleted { resource_id, .. } => BookingOwner::Resource(*resource_id),
        }
    }

    /// Channel id for change notifications.
    pub fn channel(&self) -> Ulid {
        match self.owner() {
            BookingOwner::Professor(id) | BookingOwner::Resource(id) => id,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

/// Whose bookings to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingScope {
    Professor(Ulid),
    Student(Ulid),
    Resource(Ulid),
    User(Ulid),
}

/// Inclusive bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<Ms>,
    pub to: Option<Ms>,
}

impl TimeRange {
    pub fn admits(&self, start: Ms, end: Ms) -> bool {
        self.from.is_none_or(|f| start >= f) && self.to.is_none_or(|t| end <= t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingFilter {
    pub scope: BookingScope,
    pub range: TimeRange,
    pub include_cancelled: bool,
}

impl BookingFilter {
    pub fn new(scope: BookingScope) -> Self {
        Self {
            scope,
            range: TimeRange::default(),
            include_cancelled: true,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn active_only(mut self) -> Self {
        self.include_cancelled = false;
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        if !self.include_cancelled && !booking.status().is_active() {
            return false;
        }
        match booking {
            Booking::Tutoring(b) => self.range.admits(b.span.start, b.span.end),
            Booking::Resource(b) => self.range.admits(b.reserved_at, b.reserved_at),
        }
    }
}
