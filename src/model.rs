use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::time::{iso, iso_opt};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span starting at `start` lasting `minutes`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The shared part of two overlapping spans.
    pub fn intersection(&self, other: &Span) -> Option<Span> {
        if self.overlaps(other) {
            Some(Span::new(self.start.max(other.start), self.end.min(other.end)))
        } else {
            None
        }
    }
}

// ── Status enums ─────────────────────────────────────────────────

/// A status string that matched none of the allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub value: String,
    pub allowed: &'static [&'static str],
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid status. Must be one of: {:?}", self.allowed)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            /// Case-insensitive.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { value: s.to_string(), allowed: Self::ALL }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(AppointmentStatus {
    Scheduled => "scheduled",
    Confirmed => "confirmed",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

string_enum!(TechnicianStatus {
    Available => "available",
    EnRoute => "en_route",
    OnSite => "on_site",
    Busy => "busy",
    OffDuty => "off_duty",
});

string_enum!(ClaimStatus {
    Submitted => "submitted",
    UnderReview => "under_review",
    Approved => "approved",
    Rejected => "rejected",
    Completed => "completed",
});

string_enum!(UrgencyLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    Emergency => "emergency",
});

/// Shared vocabulary for `active` / `completed` list filters.
pub trait Lifecycle: Copy {
    fn as_status_str(&self) -> &'static str;
    fn is_active(&self) -> bool;
    fn is_closed(&self) -> bool;
}

impl Lifecycle for AppointmentStatus {
    fn as_status_str(&self) -> &'static str {
        self.as_str()
    }

    fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Confirmed | AppointmentStatus::InProgress
        )
    }

    fn is_closed(&self) -> bool {
        !self.is_active()
    }
}

impl Lifecycle for ClaimStatus {
    fn as_status_str(&self) -> &'static str {
        self.as_str()
    }

    fn is_active(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Submitted | ClaimStatus::UnderReview | ClaimStatus::Approved
        )
    }

    fn is_closed(&self) -> bool {
        matches!(self, ClaimStatus::Completed | ClaimStatus::Rejected)
    }
}

impl Lifecycle for TechnicianStatus {
    fn as_status_str(&self) -> &'static str {
        self.as_str()
    }

    // Technicians have no active/closed grouping; only exact filters match.
    fn is_active(&self) -> bool {
        false
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// `all`, `active`, `completed`, or an exact status value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Active,
    Completed,
    Exact(String),
}

impl StatusFilter {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "all" => StatusFilter::All,
            "active" => StatusFilter::Active,
            "completed" => StatusFilter::Completed,
            other => StatusFilter::Exact(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
            StatusFilter::Exact(s) => s,
        }
    }

    pub fn matches<S: Lifecycle>(&self, status: S) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Active => status.is_active(),
            StatusFilter::Completed => status.is_closed(),
            StatusFilter::Exact(s) => status.as_status_str() == s,
        }
    }
}

// ── Free-form attributes ─────────────────────────────────────────

/// Free-form key/value map (service details, policy details, profiles).
///
/// Serializes as a JSON object in human-readable formats and as an embedded
/// JSON string in binary formats, which cannot describe arbitrary values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(pub Map<String, Value>);

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Shallow merge: keys in `other` overwrite existing ones.
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (k, v) in other {
            self.0.insert(k, v);
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            self.0.serialize(s)
        } else {
            let text = serde_json::to_string(&self.0).map_err(S::Error::custom)?;
            s.serialize_str(&text)
        }
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            Map::deserialize(d).map(Attributes)
        } else {
            let text = String::deserialize(d)?;
            serde_json::from_str(&text)
                .map(Attributes)
                .map_err(D::Error::custom)
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub policy_number: String,
    pub covered_appliances: Vec<String>,
    #[serde(with = "iso")]
    pub created_at: Ms,
    #[serde(default)]
    pub policy_details: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Technician {
    pub id: String,
    pub name: String,
    pub specialties: Vec<String>,
    /// `[latitude, longitude]`
    pub current_location: (f64, f64),
    pub status: TechnicianStatus,
    pub phone: String,
    #[serde(default, with = "iso_opt")]
    pub estimated_arrival: Option<Ms>,
    #[serde(default)]
    pub current_appointment_id: Option<String>,
    #[serde(default)]
    pub profile: Attributes,
}

impl Technician {
    pub fn rating(&self) -> f64 {
        self.profile.get_f64("rating").unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub customer_id: String,
    pub technician_id: String,
    pub appliance_type: String,
    pub issue_description: String,
    #[serde(with = "iso")]
    pub scheduled_datetime: Ms,
    pub status: AppointmentStatus,
    /// Minutes.
    pub estimated_duration: u32,
    #[serde(with = "iso")]
    pub created_at: Ms,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub claim_id: Option<String>,
    #[serde(default)]
    pub service_details: Attributes,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.scheduled_datetime, self.estimated_duration)
    }

    pub fn visit(&self) -> Visit {
        Visit {
            appointment_id: self.id.clone(),
            span: self.span(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub customer_id: String,
    pub appliance_type: String,
    pub issue_description: String,
    pub status: ClaimStatus,
    pub urgency_level: UrgencyLevel,
    #[serde(with = "iso")]
    pub created_at: Ms,
    #[serde(default, with = "iso_opt")]
    pub approved_at: Option<Ms>,
    #[serde(default, with = "iso_opt")]
    pub completed_at: Option<Ms>,
    #[serde(default)]
    pub appointment_id: Option<String>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Append `entry` to a ` | `-separated notes field.
pub fn append_note(notes: Option<&str>, entry: &str) -> String {
    format!("{} | {entry}", notes.unwrap_or(""))
        .trim_matches(|c| c == ' ' || c == '|')
        .to_string()
}

// ── Technician schedule ──────────────────────────────────────────

/// One appointment as seen from its technician's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub appointment_id: String,
    pub span: Span,
    pub status: AppointmentStatus,
}

impl Visit {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub technician_id: String,
    /// All visits, active or not, sorted by `span.start`.
    pub visits: Vec<Visit>,
}

impl Schedule {
    pub fn new(technician_id: impl Into<String>) -> Self {
        Self {
            technician_id: technician_id.into(),
            visits: Vec::new(),
        }
    }

    /// Insert visit maintaining sort order by span.start.
    pub fn insert_visit(&mut self, visit: Visit) {
        let pos = self
            .visits
            .binary_search_by_key(&visit.span.start, |v| v.span.start)
            .unwrap_or_else(|e| e);
        self.visits.insert(pos, visit);
    }

    pub fn remove_visit(&mut self, appointment_id: &str) -> Option<Visit> {
        let pos = self
            .visits
            .iter()
            .position(|v| v.appointment_id == appointment_id)?;
        Some(self.visits.remove(pos))
    }

    /// Replace any visit for the same appointment.
    pub fn upsert_visit(&mut self, visit: Visit) {
        self.remove_visit(&visit.appointment_id);
        self.insert_visit(visit);
    }

    /// Visits whose span overlaps the query window.
    /// Uses binary search to skip visits starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Visit> {
        let right_bound = self.visits.partition_point(|v| v.span.start < query.end);
        self.visits[..right_bound]
            .iter()
            .filter(move |v| v.span.end > query.start)
    }

    pub fn active_visits(&self) -> impl Iterator<Item = &Visit> {
        self.visits.iter().filter(|v| v.is_active())
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Every mutation is recorded as a full snapshot of the record it touched.
/// This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AppointmentCreated { appointment: Appointment },
    AppointmentUpdated { appointment: Appointment },
    AppointmentCancelled { appointment: Appointment },
    AppointmentRescheduled { appointment: Appointment },
    ClaimCreated { claim: Claim },
    ClaimUpdated { claim: Claim },
    TechnicianUpdated { technician: Technician },
}

impl Event {
    /// Notification channel: the technician for scheduling events, the
    /// customer for claim events.
    pub fn channel(&self) -> &str {
        match self {
            Event::AppointmentCreated { appointment }
            | Event::AppointmentUpdated { appointment }
            | Event::AppointmentCancelled { appointment }
            | Event::AppointmentRescheduled { appointment } => &appointment.technician_id,
            Event::ClaimCreated { claim } | Event::ClaimUpdated { claim } => &claim.customer_id,
            Event::TechnicianUpdated { technician } => &technician.id,
        }
    }

    pub fn appointment(&self) -> Option<&Appointment> {
        match self {
            Event::AppointmentCreated { appointment }
            | Event::AppointmentUpdated { appointment }
            | Event::AppointmentCancelled { appointment }
            | Event::AppointmentRescheduled { appointment } => Some(appointment),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::AppointmentCreated { .. } => "appointment_created",
            Event::AppointmentUpdated { .. } => "appointment_updated",
            Event::AppointmentCancelled { .. } => "appointment_cancelled",
            Event::AppointmentRescheduled { .. } => "appointment_rescheduled",
            Event::ClaimCreated { .. } => "claim_created",
            Event::ClaimUpdated { .. } => "claim_updated",
            Event::TechnicianUpdated { .. } => "technician_updated",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// An active appointment that overlaps a candidate window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub appointment_id: String,
    pub existing: Span,
    pub overlap: Span,
}

impl Conflict {
    pub fn existing_duration_minutes(&self) -> Ms {
        self.existing.duration_ms() / MINUTE_MS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    #[serde(with = "iso")]
    pub datetime: Ms,
    pub technician_id: String,
    pub technician_name: String,
    pub duration_minutes: u32,
    pub specialties: Vec<String>,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotSearch {
    /// At most `MAX_SLOTS_RETURNED`, ordered by (datetime asc, rating desc).
    pub slots: Vec<Slot>,
    /// Count before truncation.
    pub total_slots: usize,
    pub qualified_technicians: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alternative {
    #[serde(with = "iso")]
    pub datetime: Ms,
    pub technician_id: String,
    pub duration_minutes: u32,
}
