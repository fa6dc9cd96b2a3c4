use std::sync::Arc;

use tokio::sync::Mutex;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_id, validate_text};
use super::{Engine, EngineError, Entity, SharedFacultyState};

fn validate_capacity(points: u32) -> Result<(), EngineError> {
    if points == 0 {
        return Err(EngineError::validation("capacity points must be positive"));
    }
    if points > MAX_CAPACITY_POINTS {
        return Err(EngineError::LimitExceeded("capacity points too large"));
    }
    Ok(())
}

impl Engine {
    /// Open a ledger for a faculty member. `capacity_points` falls back to
    /// the engine default.
    pub async fn register_faculty(
        &self,
        id: FacultyId,
        name: Option<String>,
        capacity_points: Option<u32>,
    ) -> Result<WorkloadSnapshot, EngineError> {
        validate_id("faculty id", &id)?;
        if let Some(n) = &name {
            validate_text(n, MAX_NAME_LEN)?;
        }
        let capacity_points = capacity_points.unwrap_or(self.settings.default_capacity_points);
        validate_capacity(capacity_points)?;

        let _registry = self.registry_lock.lock().await;
        if self.store.contains_faculty(&id) {
            return Err(EngineError::AlreadyExists(Entity::Faculty(id)));
        }
        if self.store.faculty_count() >= MAX_FACULTY {
            return Err(EngineError::LimitExceeded("too many faculty"));
        }

        let event = Event::FacultyRegistered {
            id: id.clone(),
            name: name.clone(),
            capacity_points,
        };
        self.wal_append(&event).await?;
        let fw = FacultyWorkload::new(id.clone(), name, capacity_points);
        let snapshot = fw.snapshot();
        self.store.insert_faculty(id, Arc::new(Mutex::new(fw)));
        Ok(snapshot)
    }

    pub async fn set_faculty_capacity(
        &self,
        id: &str,
        capacity_points: u32,
    ) -> Result<WorkloadSnapshot, EngineError> {
        validate_capacity(capacity_points)?;
        let fw = self.faculty_state(id)?;
        let mut guard = fw.lock().await;
        let event = Event::FacultyCapacityChanged {
            id: id.to_string(),
            capacity_points,
        };
        self.persist_and_apply_faculty(&mut guard, &event).await?;
        Ok(guard.snapshot())
    }

    /// Charge `points` (or the default weight) for an event to a faculty
    /// member. A second assignment of the same event is refused rather than
    /// counted twice. Under `HardCap`, going past capacity is refused too.
    pub async fn assign(
        &self,
        faculty_id: &str,
        event_id: &str,
        points: Option<u32>,
    ) -> Result<WorkloadSnapshot, EngineError> {
        validate_id("event id", event_id)?;
        let points = points.unwrap_or(self.settings.default_event_points);
        if points == 0 {
            return Err(EngineError::validation("workload points must be positive"));
        }
        if points > MAX_EVENT_POINTS {
            return Err(EngineError::LimitExceeded("workload points too large"));
        }

        let fw = self.faculty_state(faculty_id)?;
        let mut guard = fw.lock().await;
        if guard.assignments.contains_key(event_id) {
            return Err(EngineError::AlreadyAssigned {
                faculty_id: faculty_id.to_string(),
                event_id: event_id.to_string(),
            });
        }
        if guard.assignments.len() >= MAX_ASSIGNMENTS_PER_FACULTY {
            return Err(EngineError::LimitExceeded("too many assignments for faculty"));
        }

        let projected = guard.allocated_points.saturating_add(points);
        if projected > guard.capacity_points {
            match self.settings.workload_policy {
                AdmissionPolicy::HardCap => {
                    tracing::warn!(
                        "refused {event_id} for {faculty_id}: {projected}/{} points",
                        guard.capacity_points
                    );
                    return Err(EngineError::OverCapacity {
                        faculty_id: faculty_id.to_string(),
                        allocated: guard.allocated_points,
                        capacity: guard.capacity_points,
                        requested: points,
                    });
                }
                AdmissionPolicy::WarnOnly => {
                    tracing::warn!(
                        "{faculty_id} over capacity after {event_id}: {projected}/{} points",
                        guard.capacity_points
                    );
                }
            }
        }

        let event = Event::FacultyAssigned {
            faculty_id: faculty_id.to_string(),
            event_id: event_id.to_string(),
            points,
        };
        self.persist_and_apply_faculty(&mut guard, &event).await?;
        let snapshot = guard.snapshot();
        tracing::debug!("assigned {event_id} to {faculty_id}: band {}", snapshot.band);
        Ok(snapshot)
    }

    /// Release an event, giving back exactly the points it was charged.
    pub async fn unassign(
        &self,
        faculty_id: &str,
        event_id: &str,
    ) -> Result<WorkloadSnapshot, EngineError> {
        let fw = self.faculty_state(faculty_id)?;
        let mut guard = fw.lock().await;
        if !guard.assignments.contains_key(event_id) {
            return Err(EngineError::NotAssigned {
                faculty_id: faculty_id.to_string(),
                event_id: event_id.to_string(),
            });
        }
        let event = Event::FacultyUnassigned {
            faculty_id: faculty_id.to_string(),
            event_id: event_id.to_string(),
        };
        self.persist_and_apply_faculty(&mut guard, &event).await?;
        Ok(guard.snapshot())
    }

    pub async fn workload_snapshot(&self, faculty_id: &str) -> Result<WorkloadSnapshot, EngineError> {
        let fw = self.faculty_state(faculty_id)?;
        let guard = fw.lock().await;
        Ok(guard.snapshot())
    }

    /// Snapshots for every registered faculty member, ordered by id.
    pub async fn list_workloads(&self) -> Vec<WorkloadSnapshot> {
        let mut out = Vec::with_capacity(self.store.faculty_count());
        for id in self.store.faculty_ids() {
            if let Some(fw) = self.store.get_faculty(&id) {
                out.push(fw.lock().await.snapshot());
            }
        }
        out
    }

    fn faculty_state(&self, id: &str) -> Result<SharedFacultyState, EngineError> {
        self.store
            .get_faculty(id)
            .ok_or_else(|| EngineError::NotFound(Entity::Faculty(id.to_string())))
    }
}
