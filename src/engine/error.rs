use thiserror::Error;
use ulid::Ulid;

use crate::model::{Commitment, EventId, FacultyId, ResourceId};

/// Why a resource cannot take a new commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    Missing,
    Maintenance,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::Missing => f.write_str("not registered"),
            Unavailable::Maintenance => f.write_str("under maintenance"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Resource(ResourceId),
    Commitment(Ulid),
    Faculty(FacultyId),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Resource(id) => write!(f, "resource {id}"),
            Entity::Commitment(id) => write!(f, "commitment {id}"),
            Entity::Faculty(id) => write!(f, "faculty {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("resource {resource_id} unavailable: {reason}")]
    ResourceUnavailable {
        resource_id: ResourceId,
        reason: Unavailable,
    },
    #[error("conflicts with {} commitment(s): {}", .0.len(), list_commitments(.0))]
    Conflict(Vec<Commitment>),
    #[error("faculty {faculty_id} already assigned to event {event_id}")]
    AlreadyAssigned {
        faculty_id: FacultyId,
        event_id: EventId,
    },
    #[error("faculty {faculty_id} is not assigned to event {event_id}")]
    NotAssigned {
        faculty_id: FacultyId,
        event_id: EventId,
    },
    #[error("over capacity: faculty {faculty_id} has {allocated}/{capacity} points, cannot add {requested}")]
    OverCapacity {
        faculty_id: FacultyId,
        allocated: u32,
        capacity: u32,
        requested: u32,
    },
    #[error("not found: {0}")]
    NotFound(Entity),
    #[error("already exists: {0}")]
    AlreadyExists(Entity),
    #[error("cannot remove resource {0}: commitments still reference it")]
    HasCommitments(ResourceId),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

fn list_commitments(commitments: &[Commitment]) -> String {
    commitments
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// The clashing commitments of a `Conflict`, empty otherwise.
    pub fn conflicts(&self) -> &[Commitment] {
        match self {
            EngineError::Conflict(list) => list,
            _ => &[],
        }
    }
}
