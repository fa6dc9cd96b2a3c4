use std::sync::Arc;

use dashmap::DashMap;

use crate::model::*;

use super::{SharedFacultyState, SharedResourceState};

/// In-memory maps behind the engine: resources with their day schedules,
/// the commitment → resource index, and faculty ledgers.
pub struct InMemoryStore {
    resources: DashMap<ResourceId, SharedResourceState>,
    commitment_to_resource: DashMap<CommitmentId, ResourceId>,
    faculty: DashMap<FacultyId, SharedFacultyState>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            commitment_to_resource: DashMap::new(),
            faculty: DashMap::new(),
        }
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains_resource(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn get_resource(&self, id: &str) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    /// True while `state` is still the registered state for `id`.
    pub fn is_current(&self, id: &str, state: &SharedResourceState) -> bool {
        self.resources
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), state))
    }

    pub fn insert_resource(&self, id: ResourceId, state: SharedResourceState) {
        self.resources.insert(id, state);
    }

    pub fn remove_resource(&self, id: &str) -> Option<(ResourceId, SharedResourceState)> {
        self.resources.remove(id)
    }

    /// Registered resource ids, sorted.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.resources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Commitment index ─────────────────────────────────────

    pub fn resource_for_commitment(&self, id: &CommitmentId) -> Option<ResourceId> {
        self.commitment_to_resource.get(id).map(|e| e.value().clone())
    }

    pub fn commitment_count(&self) -> usize {
        self.commitment_to_resource.len()
    }

    fn map_commitment(&self, id: CommitmentId, resource_id: ResourceId) {
        self.commitment_to_resource.insert(id, resource_id);
    }

    fn unmap_commitment(&self, id: &CommitmentId) {
        self.commitment_to_resource.remove(id);
    }

    // ── Faculty ──────────────────────────────────────────────

    pub fn faculty_count(&self) -> usize {
        self.faculty.len()
    }

    pub fn contains_faculty(&self, id: &str) -> bool {
        self.faculty.contains_key(id)
    }

    pub fn get_faculty(&self, id: &str) -> Option<SharedFacultyState> {
        self.faculty.get(id).map(|e| e.value().clone())
    }

    pub fn insert_faculty(&self, id: FacultyId, state: SharedFacultyState) {
        self.faculty.insert(id, state);
    }

    /// Registered faculty ids, sorted.
    pub fn faculty_ids(&self) -> Vec<FacultyId> {
        let mut ids: Vec<FacultyId> = self.faculty.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // ── Event application ────────────────────────────────────

    /// Apply a resource-scoped event. The caller holds the resource's lock.
    /// `CommitmentUpdated` is applied once to the source and once to the
    /// destination resource when the commitment moves.
    pub fn apply_resource_event(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceStatusChanged { status, .. } => {
                rs.resource.status = *status;
            }
            Event::CommitmentAdded { commitment } => {
                rs.insert_commitment(commitment.clone());
                self.map_commitment(commitment.id, commitment.resource_id.clone());
            }
            Event::CommitmentUpdated {
                previous_resource_id,
                commitment,
            } => {
                if rs.id() == previous_resource_id.as_str() {
                    rs.remove_commitment(commitment.id);
                }
                if rs.id() == commitment.resource_id.as_str() {
                    rs.remove_commitment(commitment.id);
                    rs.insert_commitment(commitment.clone());
                }
                self.map_commitment(commitment.id, commitment.resource_id.clone());
            }
            Event::CommitmentRemoved { id, .. } => {
                rs.remove_commitment(*id);
                self.unmap_commitment(id);
            }
            // Registration/removal happen at the map level; faculty events
            // never target a resource.
            Event::ResourceRegistered { .. }
            | Event::ResourceRemoved { .. }
            | Event::FacultyRegistered { .. }
            | Event::FacultyCapacityChanged { .. }
            | Event::FacultyAssigned { .. }
            | Event::FacultyUnassigned { .. } => {}
        }
    }

    /// Apply a faculty-scoped event. The caller holds the faculty lock.
    pub fn apply_faculty_event(fw: &mut FacultyWorkload, event: &Event) {
        match event {
            Event::FacultyCapacityChanged { capacity_points, .. } => {
                fw.capacity_points = *capacity_points;
            }
            Event::FacultyAssigned { event_id, points, .. } => {
                if fw.assignments.insert(event_id.clone(), *points).is_none() {
                    fw.allocated_points = fw.allocated_points.saturating_add(*points);
                }
            }
            Event::FacultyUnassigned { event_id, .. } => {
                if let Some(points) = fw.assignments.remove(event_id) {
                    fw.allocated_points = fw.allocated_points.saturating_sub(points);
                }
            }
            _ => {}
        }
    }
}

/// The resource an event mutates, for events applied under a resource lock.
pub(crate) fn event_resource_id(event: &Event) -> Option<&str> {
    match event {
        Event::ResourceStatusChanged { id, .. } => Some(id.as_str()),
        Event::CommitmentAdded { commitment } | Event::CommitmentUpdated { commitment, .. } => {
            Some(commitment.resource_id.as_str())
        }
        Event::CommitmentRemoved { resource_id, .. } => Some(resource_id.as_str()),
        _ => None,
    }
}

/// The faculty member an event mutates, for events applied under a faculty lock.
pub(crate) fn event_faculty_id(event: &Event) -> Option<&str> {
    match event {
        Event::FacultyCapacityChanged { id, .. } => Some(id.as_str()),
        Event::FacultyAssigned { faculty_id, .. } | Event::FacultyUnassigned { faculty_id, .. } => {
            Some(faculty_id.as_str())
        }
        _ => None,
    }
}
