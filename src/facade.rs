//! The calls a portal front end makes: attempt a booking, place a timetable
//! entry, pull the conflict grid, move faculty load around.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::engine::{Engine, EngineError};
use crate::model::*;

pub struct Portal {
    engine: Arc<Engine>,
    timetable_policy: ConflictPolicy,
}

impl Portal {
    /// `timetable_policy` governs recurring timetable entries only; ad hoc
    /// bookings and events are always rejected on conflict.
    pub fn new(engine: Arc<Engine>, timetable_policy: ConflictPolicy) -> Self {
        Self {
            engine,
            timetable_policy,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn register_resource(&self, resource: Resource) -> Result<(), EngineError> {
        self.engine.register_resource(resource).await
    }

    pub async fn set_resource_status(
        &self,
        resource_id: &str,
        status: ResourceStatus,
    ) -> Result<Resource, EngineError> {
        self.engine.set_resource_status(resource_id, status).await
    }

    pub async fn resource(&self, resource_id: &str) -> Result<Resource, EngineError> {
        self.engine.get_resource(resource_id).await
    }

    pub async fn list_resources(&self) -> Vec<Resource> {
        self.engine.list_resources().await
    }

    pub async fn remove_resource(&self, resource_id: &str) -> Result<(), EngineError> {
        self.engine.remove_resource(resource_id).await
    }

    // ── Commitments ──────────────────────────────────────────

    /// Ad hoc booking of a resource on one date. Any clash is an error that
    /// lists every clashing commitment.
    pub async fn book_resource(
        &self,
        resource_id: &str,
        date: NaiveDate,
        range: TimeRange,
        purpose: &str,
        requested_by: &str,
    ) -> Result<CommitmentId, EngineError> {
        let candidate = NewCommitment {
            resource_id: resource_id.to_string(),
            slot: Slot::Dated { date, range },
            purpose: purpose.to_string(),
            owner_name: requested_by.to_string(),
            audience: AudienceScope::All,
            source: SourceType::AdhocBooking,
        };
        let admission = self
            .engine
            .add_commitment(candidate, ConflictPolicy::Reject)
            .await
            .inspect_err(|e| tracing::info!("booking of {resource_id} on {date} {range} refused: {e}"))?;
        tracing::info!("booked {resource_id} on {date} {range} for {requested_by}");
        Ok(admission.commitment.id)
    }

    pub async fn add_timetable_entry(
        &self,
        resource_id: &str,
        weekday: Weekday,
        range: TimeRange,
        subject: &str,
        faculty: &str,
        audience: AudienceScope,
    ) -> Result<Admission, EngineError> {
        let candidate = NewCommitment {
            resource_id: resource_id.to_string(),
            slot: Slot::Recurring { weekday, range },
            purpose: subject.to_string(),
            owner_name: faculty.to_string(),
            audience,
            source: SourceType::Class,
        };
        self.engine.add_commitment(candidate, self.timetable_policy).await
    }

    pub async fn add_event_commitment(
        &self,
        resource_id: &str,
        date: NaiveDate,
        range: TimeRange,
        title: &str,
        organizer: &str,
        audience: AudienceScope,
    ) -> Result<Admission, EngineError> {
        let candidate = NewCommitment {
            resource_id: resource_id.to_string(),
            slot: Slot::Dated { date, range },
            purpose: title.to_string(),
            owner_name: organizer.to_string(),
            audience,
            source: SourceType::Event,
        };
        self.engine.add_commitment(candidate, ConflictPolicy::Reject).await
    }

    pub async fn update_commitment(
        &self,
        id: CommitmentId,
        patch: CommitmentPatch,
    ) -> Result<Admission, EngineError> {
        let current = self.engine.get_commitment(id).await?;
        let policy = match current.source {
            SourceType::Class => self.timetable_policy,
            SourceType::Event | SourceType::AdhocBooking => ConflictPolicy::Reject,
        };
        self.engine.update_commitment(id, patch, policy).await
    }

    pub async fn remove_commitment(&self, id: CommitmentId) -> Result<Commitment, EngineError> {
        self.engine.remove_commitment(id).await
    }

    pub async fn commitments(&self, resource_id: Option<&str>) -> Result<Vec<Commitment>, EngineError> {
        self.engine.list_commitments(resource_id).await
    }

    pub async fn weekly_conflict_report(
        &self,
        resource_id: Option<&str>,
    ) -> Result<Vec<ConflictGroup>, EngineError> {
        self.engine.find_all_conflicts(resource_id).await
    }

    // ── Faculty workload ─────────────────────────────────────

    pub async fn register_faculty(
        &self,
        faculty_id: &str,
        name: Option<String>,
        capacity_points: Option<u32>,
    ) -> Result<WorkloadSnapshot, EngineError> {
        self.engine
            .register_faculty(faculty_id.to_string(), name, capacity_points)
            .await
    }

    pub async fn set_faculty_capacity(
        &self,
        faculty_id: &str,
        capacity_points: u32,
    ) -> Result<WorkloadSnapshot, EngineError> {
        self.engine.set_faculty_capacity(faculty_id, capacity_points).await
    }

    pub async fn allocate_faculty_to_event(
        &self,
        faculty_id: &str,
        event_id: &str,
        points: Option<u32>,
    ) -> Result<WorkloadSnapshot, EngineError> {
        self.engine.assign(faculty_id, event_id, points).await
    }

    pub async fn deallocate_faculty_from_event(
        &self,
        faculty_id: &str,
        event_id: &str,
    ) -> Result<WorkloadSnapshot, EngineError> {
        self.engine.unassign(faculty_id, event_id).await
    }

    pub async fn faculty_workload(&self, faculty_id: &str) -> Result<WorkloadSnapshot, EngineError> {
        self.engine.workload_snapshot(faculty_id).await
    }

    pub async fn faculty_workloads(&self) -> Vec<WorkloadSnapshot> {
        self.engine.list_workloads().await
    }
}
