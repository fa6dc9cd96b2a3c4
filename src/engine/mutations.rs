use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{admission_conflicts, validate_commitment};
use super::{Engine, EngineError, Entity, Unavailable};

/// Apply `policy` to the clashes found for a candidate: `Reject` turns any
/// clash into an error, `Warn` hands them back for the caller to surface.
fn settle(clashes: Vec<Commitment>, policy: ConflictPolicy) -> Result<Vec<Commitment>, EngineError> {
    if clashes.is_empty() {
        return Ok(clashes);
    }
    match policy {
        ConflictPolicy::Reject => {
            metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => "rejected")
                .increment(1);
            Err(EngineError::Conflict(clashes))
        }
        ConflictPolicy::Warn => Ok(clashes),
    }
}

fn ensure_available(rs: &ResourceState) -> Result<(), EngineError> {
    match rs.resource.status {
        ResourceStatus::Available => Ok(()),
        ResourceStatus::Maintenance => Err(EngineError::ResourceUnavailable {
            resource_id: rs.resource.id.clone(),
            reason: Unavailable::Maintenance,
        }),
    }
}

fn missing(resource_id: &str) -> EngineError {
    EngineError::ResourceUnavailable {
        resource_id: resource_id.to_string(),
        reason: Unavailable::Missing,
    }
}

impl Engine {
    /// Dry-run admission: every commitment the candidate would clash with.
    /// An empty list means the slot is free.
    pub async fn can_admit(
        &self,
        resource_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Commitment>, EngineError> {
        super::conflict::validate_range(&slot.range())?;
        let rs = self.store.get_resource(resource_id).ok_or_else(|| missing(resource_id))?;
        let guard = rs.read().await;
        ensure_available(&guard)?;
        Ok(admission_conflicts(&guard, slot, None)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Admission check and insertion under the resource's write lock.
    pub async fn add_commitment(
        &self,
        candidate: NewCommitment,
        policy: ConflictPolicy,
    ) -> Result<Admission, EngineError> {
        let commitment = candidate.with_id(Ulid::new());
        validate_commitment(&commitment)?;

        let rs = self
            .store
            .get_resource(&commitment.resource_id)
            .ok_or_else(|| missing(&commitment.resource_id))?;
        let mut guard = rs.write().await;
        if !self.store.is_current(&commitment.resource_id, &rs) {
            return Err(missing(&commitment.resource_id));
        }
        ensure_available(&guard)?;
        if guard.commitment_count() >= MAX_COMMITMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many commitments on resource"));
        }

        let clashes = admission_conflicts(&guard, &commitment.slot, None)
            .into_iter()
            .cloned()
            .collect();
        let warnings = settle(clashes, policy)?;

        let event = Event::CommitmentAdded {
            commitment: commitment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => "accepted")
            .increment(1);
        if warnings.is_empty() {
            tracing::debug!("admitted {commitment}");
        } else {
            tracing::warn!(
                "admitted {commitment} despite {} clash(es) on {}",
                warnings.len(),
                commitment.resource_id
            );
        }
        Ok(Admission { commitment, warnings })
    }

    /// True when the index no longer points `id` at `resource_id`: a move
    /// finished while the caller waited for that resource's lock.
    fn relocated(&self, id: CommitmentId, resource_id: &str) -> bool {
        self.store
            .resource_for_commitment(&id)
            .is_some_and(|now| now != resource_id)
    }

    pub async fn remove_commitment(&self, id: CommitmentId) -> Result<Commitment, EngineError> {
        let not_found = || EngineError::NotFound(Entity::Commitment(id));
        loop {
            let resource_id = self.store.resource_for_commitment(&id).ok_or_else(not_found)?;
            let Some(rs) = self.store.get_resource(&resource_id) else {
                if self.relocated(id, &resource_id) {
                    continue;
                }
                return Err(not_found());
            };
            let mut guard = rs.write().await;
            let Some(removed) = guard.get_commitment(id).cloned() else {
                if self.relocated(id, &resource_id) {
                    continue;
                }
                return Err(not_found());
            };

            let event = Event::CommitmentRemoved { id, resource_id };
            self.persist_and_apply(&mut guard, &event).await?;
            tracing::debug!("removed {removed}");
            return Ok(removed);
        }
    }

    /// Replace fields of a commitment and re-admit it. Moving to another
    /// resource locks both resources in id order.
    pub async fn update_commitment(
        &self,
        id: CommitmentId,
        patch: CommitmentPatch,
        policy: ConflictPolicy,
    ) -> Result<Admission, EngineError> {
        let not_found = || EngineError::NotFound(Entity::Commitment(id));
        loop {
            let source_id = self.store.resource_for_commitment(&id).ok_or_else(not_found)?;
            let target_id = patch.resource_id.clone().unwrap_or_else(|| source_id.clone());
            let Some(source_rs) = self.store.get_resource(&source_id) else {
                if self.relocated(id, &source_id) {
                    continue;
                }
                return Err(not_found());
            };

            if target_id == source_id {
                let mut guard = source_rs.write().await;
                let Some(current) = guard.get_commitment(id).cloned() else {
                    if self.relocated(id, &source_id) {
                        continue;
                    }
                    return Err(not_found());
                };
                let updated = patch.clone().apply_to(&current);
                validate_commitment(&updated)?;
                ensure_available(&guard)?;

                let clashes = admission_conflicts(&guard, &updated.slot, Some(id))
                    .into_iter()
                    .cloned()
                    .collect();
                let warnings = settle(clashes, policy)?;

                let event = Event::CommitmentUpdated {
                    previous_resource_id: source_id,
                    commitment: updated.clone(),
                };
                self.persist_and_apply(&mut guard, &event).await?;
                tracing::debug!("updated {updated}");
                return Ok(Admission {
                    commitment: updated,
                    warnings,
                });
            }

            let target_rs = self
                .store
                .get_resource(&target_id)
                .ok_or_else(|| missing(&target_id))?;

            // Acquire write locks in sorted order to prevent deadlocks.
            let (mut source, mut target) = if source_id < target_id {
                let s = source_rs.write().await;
                let t = target_rs.write().await;
                (s, t)
            } else {
                let t = target_rs.write().await;
                let s = source_rs.write().await;
                (s, t)
            };
            if !self.store.is_current(&target_id, &target_rs) {
                return Err(missing(&target_id));
            }

            let Some(current) = source.get_commitment(id).cloned() else {
                if self.relocated(id, &source_id) {
                    continue;
                }
                return Err(not_found());
            };
            let updated = patch.clone().apply_to(&current);
            validate_commitment(&updated)?;
            ensure_available(&target)?;
            if target.commitment_count() >= MAX_COMMITMENTS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many commitments on resource"));
            }

            let clashes = admission_conflicts(&target, &updated.slot, None)
                .into_iter()
                .cloned()
                .collect();
            let warnings = settle(clashes, policy)?;

            let event = Event::CommitmentUpdated {
                previous_resource_id: source_id.clone(),
                commitment: updated.clone(),
            };
            self.wal_append(&event).await?;
            self.store.apply_resource_event(&mut source, &event);
            self.store.apply_resource_event(&mut target, &event);
            tracing::info!("moved commitment {id} from {source_id} to {target_id}");
            return Ok(Admission {
                commitment: updated,
                warnings,
            });
        }
    }

    pub async fn get_commitment(&self, id: CommitmentId) -> Result<Commitment, EngineError> {
        let not_found = || EngineError::NotFound(Entity::Commitment(id));
        loop {
            let resource_id = self.store.resource_for_commitment(&id).ok_or_else(not_found)?;
            let Some(rs) = self.store.get_resource(&resource_id) else {
                if self.relocated(id, &resource_id) {
                    continue;
                }
                return Err(not_found());
            };
            let guard = rs.read().await;
            match guard.get_commitment(id) {
                Some(c) => return Ok(c.clone()),
                None if self.relocated(id, &resource_id) => continue,
                None => return Err(not_found()),
            }
        }
    }

    /// Commitments on one resource, or on every resource ordered by id.
    /// Within a resource: weekdays Mon..Sat, then dates, each by start.
    pub async fn list_commitments(
        &self,
        resource_id: Option<&str>,
    ) -> Result<Vec<Commitment>, EngineError> {
        let ids = match resource_id {
            Some(id) => {
                if !self.store.contains_resource(id) {
                    return Err(EngineError::NotFound(Entity::Resource(id.to_string())));
                }
                vec![id.to_string()]
            }
            None => self.store.resource_ids(),
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(rs) = self.store.get_resource(&id) {
                let guard = rs.read().await;
                out.extend(guard.commitments().cloned());
            }
        }
        Ok(out)
    }
}
