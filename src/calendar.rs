use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use thiserror::Error;

use crate::model::{Ms, Span};

pub const DAY_MS: Ms = 86_400_000;

/// Wall-clock calendar of the institution: one fixed UTC offset, no DST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstitutionCalendar {
    offset: FixedOffset,
}

impl Default for InstitutionCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl InstitutionCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// `None` when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    pub fn offset_ms(&self) -> Ms {
        self.offset.local_minus_utc() as Ms * 1000
    }

    /// Local calendar date containing instant `t`.
    pub fn local_date(&self, t: Ms) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(t)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .date_naive()
    }

    /// Instant at which local `date` begins.
    pub fn midnight(&self, date: NaiveDate) -> Ms {
        date.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - self.offset_ms()
    }

    /// The whole local day containing `t`, as `[midnight, next midnight)`.
    pub fn day_span(&self, t: Ms) -> Span {
        let start = self.midnight(self.local_date(t));
        Span::new(start, start + DAY_MS)
    }
}

// ── Weekly schedule parsing ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("unknown day of week: {0:?}")]
    UnknownDay(String),
    #[error("malformed wall-clock time: {0:?}")]
    BadTime(String),
    #[error("window start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },
}

/// A parsed weekly window: a weekday plus offsets from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub start: Ms,
    pub end: Ms,
}

impl WeeklySchedule {
    pub fn parse(day: &str, start: &str, end: &str) -> Result<Self, WindowError> {
        let weekday = parse_weekday(day).ok_or_else(|| WindowError::UnknownDay(day.to_string()))?;
        let start_ms = parse_wall_time(start).ok_or_else(|| WindowError::BadTime(start.to_string()))?;
        let end_ms = parse_wall_time(end).ok_or_else(|| WindowError::BadTime(end.to_string()))?;
        if start_ms >= end_ms {
            return Err(WindowError::EmptyRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self {
            weekday,
            start: start_ms,
            end: end_ms,
        })
    }

    /// The concrete interval this window occupies on `date` (caller checks the weekday).
    pub fn span_on(&self, calendar: &InstitutionCalendar, date: NaiveDate) -> Span {
        let midnight = calendar.midnight(date);
        Span::new(midnight + self.start, midnight + self.end)
    }
}

/// English (full or 3-letter) and Spanish day names, case-insensitive.
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim().to_lowercase().as_str() {
        "monday" | "mon" | "lunes" => Some(Weekday::Mon),
        "tuesday" | "tue" | "martes" => Some(Weekday::Tue),
        "wednesday" | "wed" | "miercoles" | "miércoles" => Some(Weekday::Wed),
        "thursday" | "thu" | "jueves" => Some(Weekday::Thu),
        "friday" | "fri" | "viernes" => Some(Weekday::Fri),
        "saturday" | "sat" | "sabado" | "sábado" => Some(Weekday::Sat),
        "sunday" | "sun" | "domingo" => Some(Weekday::Sun),
        _ => None,
    }
}

/// `HH:MM` or `HH:MM:SS` → ms since midnight. `24:00` means end of day.
pub fn parse_wall_time(s: &str) -> Option<Ms> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let mut fields = [0i64; 3];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }
    let [h, m, sec] = fields;
    if h == 24 && m == 0 && sec == 0 {
        return Some(DAY_MS);
    }
    if h > 23 || m > 59 || sec > 59 {
        return None;
    }
    Some(((h * 60 + m) * 60 + sec) * 1000)
}
