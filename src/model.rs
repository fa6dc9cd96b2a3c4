use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight. The only time-of-day type.
pub type Minutes = u16;

pub const MINUTES_PER_DAY: Minutes = 1440;

pub type ResourceId = String;
pub type FacultyId = String;
pub type EventId = String;
pub type CommitmentId = Ulid;

/// Half-open time-of-day range `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeRange {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self { start, end }
    }

    /// Parse `"HH:MM"` pairs, e.g. `TimeRange::from_hhmm("09:00", "10:30")`.
    pub fn from_hhmm(start: &str, end: &str) -> Option<Self> {
        Some(Self::new(parse_hhmm(start)?, parse_hhmm(end)?))
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end.saturating_sub(self.start)
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end && self.end < MINUTES_PER_DAY
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// `"09:30"` → 570. Hours 0..=23, minutes 0..=59.
pub fn parse_hhmm(s: &str) -> Option<Minutes> {
    let (h, m) = s.trim().split_once(':')?;
    let h: Minutes = h.parse().ok()?;
    let m: Minutes = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

pub fn format_hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Teaching days. Sunday carries no recurring timetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
    ];

    /// Calendar weekday of a date; `None` on Sundays.
    pub fn of_date(date: NaiveDate) -> Option<Self> {
        match date.weekday() {
            chrono::Weekday::Mon => Some(Weekday::Mon),
            chrono::Weekday::Tue => Some(Weekday::Tue),
            chrono::Weekday::Wed => Some(Weekday::Wed),
            chrono::Weekday::Thu => Some(Weekday::Thu),
            chrono::Weekday::Fri => Some(Weekday::Fri),
            chrono::Weekday::Sat => Some(Weekday::Sat),
            chrono::Weekday::Sun => None,
        }
    }

    /// Accepts short or long English names, any case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mon" | "monday" => Some(Weekday::Mon),
            "tue" | "tues" | "tuesday" => Some(Weekday::Tue),
            "wed" | "wednesday" => Some(Weekday::Wed),
            "thu" | "thur" | "thurs" | "thursday" => Some(Weekday::Thu),
            "fri" | "friday" => Some(Weekday::Fri),
            "sat" | "saturday" => Some(Weekday::Sat),
            _ => None,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
        };
        f.write_str(s)
    }
}

/// Which day a commitment (or a conflict group) lives on.
/// Weekdays sort before calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DayKey {
    Weekday(Weekday),
    Date(NaiveDate),
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayKey::Weekday(w) => write!(f, "{w}"),
            DayKey::Date(d) => write!(f, "{d}"),
        }
    }
}

/// When a commitment occupies its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    /// Every week on `weekday`, indefinitely.
    Recurring { weekday: Weekday, range: TimeRange },
    /// Once, on `date`.
    Dated { date: NaiveDate, range: TimeRange },
}

impl Slot {
    pub fn range(&self) -> TimeRange {
        match self {
            Slot::Recurring { range, .. } | Slot::Dated { range, .. } => *range,
        }
    }

    pub fn day_key(&self) -> DayKey {
        match self {
            Slot::Recurring { weekday, .. } => DayKey::Weekday(*weekday),
            Slot::Dated { date, .. } => DayKey::Date(*date),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Slot::Recurring { .. })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.day_key(), self.range())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudienceScope {
    All,
    Cohort { year: u8, section: Option<String> },
}

impl AudienceScope {
    /// `"all"`, `"2"` or `"2-A"` (also `"2/A"`, `"2 A"`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Some(AudienceScope::All);
        }
        let (year, section) = match s.find(['-', '/', ' ']) {
            Some(pos) => (&s[..pos], Some(s[pos + 1..].trim())),
            None => (s, None),
        };
        let year: u8 = year.trim().parse().ok()?;
        let section = match section {
            Some("") => return None,
            Some(sec) => Some(sec.to_uppercase()),
            None => None,
        };
        Some(AudienceScope::Cohort { year, section })
    }
}

impl fmt::Display for AudienceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudienceScope::All => f.write_str("all"),
            AudienceScope::Cohort { year, section: None } => write!(f, "{year}"),
            AudienceScope::Cohort { year, section: Some(s) } => write!(f, "{year}-{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Class,
    Event,
    AdhocBooking,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Class => "class",
            SourceType::Event => "event",
            SourceType::AdhocBooking => "adhoc-booking",
        };
        f.write_str(s)
    }
}

/// A scheduled occupation of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub resource_id: ResourceId,
    pub slot: Slot,
    pub purpose: String,
    pub owner_name: String,
    pub audience: AudienceScope,
    pub source: SourceType,
}

impl Commitment {
    pub fn range(&self) -> TimeRange {
        self.slot.range()
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}] {} ({})",
            self.id, self.source, self.slot, self.purpose, self.owner_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Lab,
    Classroom,
    Equipment,
    Venue,
}

impl ResourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "lab" => Some(ResourceKind::Lab),
            "classroom" => Some(ResourceKind::Classroom),
            "equipment" => Some(ResourceKind::Equipment),
            "venue" => Some(ResourceKind::Venue),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Lab => "lab",
            ResourceKind::Classroom => "classroom",
            ResourceKind::Equipment => "equipment",
            ResourceKind::Venue => "venue",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Maintenance,
}

impl ResourceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "available" => Some(ResourceStatus::Available),
            "maintenance" => Some(ResourceStatus::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Available => f.write_str("available"),
            ResourceStatus::Maintenance => f.write_str("maintenance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    /// Seats or units; always positive.
    pub capacity: u32,
    pub location: String,
    pub status: ResourceStatus,
}

/// Commitments on one resource for one day, sorted by `range.start`.
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    pub entries: Vec<Commitment>,
}

impl DaySchedule {
    /// Insert maintaining sort order by range.start.
    pub fn insert(&mut self, commitment: Commitment) {
        let pos = self
            .entries
            .binary_search_by_key(&commitment.range().start, |c| c.range().start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, commitment);
    }

    pub fn remove(&mut self, id: CommitmentId) -> Option<Commitment> {
        let pos = self.entries.iter().position(|c| c.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose range overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &TimeRange) -> impl Iterator<Item = &Commitment> {
        let right_bound = self
            .entries
            .partition_point(|c| c.range().start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |c| c.range().end > query.start)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the engine holds for one resource. Guarded by a single lock.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource: Resource,
    pub recurring: BTreeMap<Weekday, DaySchedule>,
    pub dated: BTreeMap<NaiveDate, DaySchedule>,
    index: HashMap<CommitmentId, DayKey>,
}

impl ResourceState {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            recurring: BTreeMap::new(),
            dated: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.resource.id
    }

    pub fn commitment_count(&self) -> usize {
        self.index.len()
    }

    pub fn schedule(&self, day: DayKey) -> Option<&DaySchedule> {
        match day {
            DayKey::Weekday(w) => self.recurring.get(&w),
            DayKey::Date(d) => self.dated.get(&d),
        }
    }

    pub fn insert_commitment(&mut self, commitment: Commitment) {
        let day = commitment.slot.day_key();
        self.index.insert(commitment.id, day);
        match day {
            DayKey::Weekday(w) => self.recurring.entry(w).or_default().insert(commitment),
            DayKey::Date(d) => self.dated.entry(d).or_default().insert(commitment),
        }
    }

    pub fn remove_commitment(&mut self, id: CommitmentId) -> Option<Commitment> {
        let day = self.index.remove(&id)?;
        match day {
            DayKey::Weekday(w) => {
                let sched = self.recurring.get_mut(&w)?;
                let removed = sched.remove(id);
                if sched.is_empty() {
                    self.recurring.remove(&w);
                }
                removed
            }
            DayKey::Date(d) => {
                let sched = self.dated.get_mut(&d)?;
                let removed = sched.remove(id);
                if sched.is_empty() {
                    self.dated.remove(&d);
                }
                removed
            }
        }
    }

    pub fn get_commitment(&self, id: CommitmentId) -> Option<&Commitment> {
        let day = self.index.get(&id)?;
        self.schedule(*day)?.entries.iter().find(|c| c.id == id)
    }

    /// All commitments in canonical order: weekdays Mon..Sat, then dates, each by start.
    pub fn commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.recurring
            .values()
            .chain(self.dated.values())
            .flat_map(|s| s.entries.iter())
    }
}

/// A commitment before admission; the engine assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommitment {
    pub resource_id: ResourceId,
    pub slot: Slot,
    pub purpose: String,
    pub owner_name: String,
    pub audience: AudienceScope,
    pub source: SourceType,
}

impl NewCommitment {
    pub fn with_id(self, id: CommitmentId) -> Commitment {
        Commitment {
            id,
            resource_id: self.resource_id,
            slot: self.slot,
            purpose: self.purpose,
            owner_name: self.owner_name,
            audience: self.audience,
            source: self.source,
        }
    }
}

/// Field replacements for an edit. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitmentPatch {
    pub resource_id: Option<ResourceId>,
    pub slot: Option<Slot>,
    pub purpose: Option<String>,
    pub owner_name: Option<String>,
    pub audience: Option<AudienceScope>,
}

impl CommitmentPatch {
    pub fn apply_to(self, current: &Commitment) -> Commitment {
        Commitment {
            id: current.id,
            resource_id: self.resource_id.unwrap_or_else(|| current.resource_id.clone()),
            slot: self.slot.unwrap_or(current.slot),
            purpose: self.purpose.unwrap_or_else(|| current.purpose.clone()),
            owner_name: self.owner_name.unwrap_or_else(|| current.owner_name.clone()),
            audience: self.audience.unwrap_or_else(|| current.audience.clone()),
            source: current.source,
        }
    }
}

/// What to do when an admission check finds clashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail with every clashing commitment.
    #[default]
    Reject,
    /// Admit anyway and hand the clashes back as warnings.
    Warn,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Some(ConflictPolicy::Reject),
            "warn" => Some(ConflictPolicy::Warn),
            _ => None,
        }
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub commitment: Commitment,
    /// Clashes admitted under `ConflictPolicy::Warn`; empty otherwise.
    pub warnings: Vec<Commitment>,
}

// ── Workload ─────────────────────────────────────────────────────

/// Reporting band for a faculty member's utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    Available,
    Moderate,
    High,
    Overloaded,
}

impl Band {
    /// Banding on utilization percent: `<50`, `[50,70)`, `[70,90)`, `>=90`.
    /// Compared in integer space so no rounding can move a boundary.
    pub fn classify(allocated: u32, capacity: u32) -> Self {
        if capacity == 0 {
            return Band::Overloaded;
        }
        let scaled = allocated as u64 * 100;
        let cap = capacity as u64;
        if scaled >= 90 * cap {
            Band::Overloaded
        } else if scaled >= 70 * cap {
            Band::High
        } else if scaled >= 50 * cap {
            Band::Moderate
        } else {
            Band::Available
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Band::Available => "Available",
            Band::Moderate => "Moderate",
            Band::High => "High",
            Band::Overloaded => "Overloaded",
        };
        f.write_str(s)
    }
}

/// Whether the ledger may push a faculty member past capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// Over-allocation is allowed and only shows up in the band.
    #[default]
    WarnOnly,
    /// Assignments that would exceed capacity fail with `OverCapacity`.
    HardCap,
}

impl AdmissionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "warn" | "warn_only" | "warn-only" => Some(AdmissionPolicy::WarnOnly),
            "hard_cap" | "hard-cap" | "hardcap" => Some(AdmissionPolicy::HardCap),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacultyWorkload {
    pub id: FacultyId,
    pub name: Option<String>,
    pub capacity_points: u32,
    /// Event id → workload points contributed by that event.
    pub assignments: BTreeMap<EventId, u32>,
    pub allocated_points: u32,
}

impl FacultyWorkload {
    pub fn new(id: FacultyId, name: Option<String>, capacity_points: u32) -> Self {
        Self {
            id,
            name,
            capacity_points,
            assignments: BTreeMap::new(),
            allocated_points: 0,
        }
    }

    pub fn snapshot(&self) -> WorkloadSnapshot {
        let utilization_percent = if self.capacity_points == 0 {
            0
        } else {
            (self.allocated_points as u64 * 100 / self.capacity_points as u64) as u32
        };
        WorkloadSnapshot {
            faculty_id: self.id.clone(),
            allocated_points: self.allocated_points,
            capacity_points: self.capacity_points,
            utilization_percent,
            band: Band::classify(self.allocated_points, self.capacity_points),
            assigned_event_ids: self.assignments.keys().cloned().collect(),
        }
    }
}

// ── Journal events ───────────────────────────────────────────────

/// Journal record types, flat with no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        resource: Resource,
    },
    ResourceStatusChanged {
        id: ResourceId,
        status: ResourceStatus,
    },
    ResourceRemoved {
        id: ResourceId,
    },
    CommitmentAdded {
        commitment: Commitment,
    },
    /// Replaces all fields; `previous_resource_id` differs from
    /// `commitment.resource_id` when the commitment moved.
    CommitmentUpdated {
        previous_resource_id: ResourceId,
        commitment: Commitment,
    },
    CommitmentRemoved {
        id: CommitmentId,
        resource_id: ResourceId,
    },
    FacultyRegistered {
        id: FacultyId,
        name: Option<String>,
        capacity_points: u32,
    },
    FacultyCapacityChanged {
        id: FacultyId,
        capacity_points: u32,
    },
    FacultyAssigned {
        faculty_id: FacultyId,
        event_id: EventId,
        points: u32,
    },
    FacultyUnassigned {
        faculty_id: FacultyId,
        event_id: EventId,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Two or more commitments on one resource that overlap on a realized day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictGroup {
    pub resource_id: ResourceId,
    pub day: DayKey,
    /// Earliest start to latest end across the cluster.
    pub window: TimeRange,
    pub commitments: Vec<Commitment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    pub faculty_id: FacultyId,
    pub allocated_points: u32,
    pub capacity_points: u32,
    pub utilization_percent: u32,
    pub band: Band,
    pub assigned_event_ids: Vec<EventId>,
}
