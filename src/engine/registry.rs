use std::sync::Arc;

use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::conflict::{validate_id, validate_text};
use super::{Engine, EngineError, Entity, SharedResourceState};

impl Engine {
    pub async fn register_resource(&self, resource: Resource) -> Result<(), EngineError> {
        validate_id("resource id", &resource.id)?;
        if resource.name.trim().is_empty() {
            return Err(EngineError::validation("resource name must not be empty"));
        }
        validate_text(&resource.name, MAX_NAME_LEN)?;
        validate_text(&resource.location, MAX_NAME_LEN)?;
        if resource.capacity == 0 {
            return Err(EngineError::validation("resource capacity must be positive"));
        }
        if resource.capacity > MAX_RESOURCE_CAPACITY {
            return Err(EngineError::LimitExceeded("resource capacity too large"));
        }

        let _registry = self.registry_lock.lock().await;
        if self.store.contains_resource(&resource.id) {
            return Err(EngineError::AlreadyExists(Entity::Resource(resource.id)));
        }
        if self.store.resource_count() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let event = Event::ResourceRegistered {
            resource: resource.clone(),
        };
        self.wal_append(&event).await?;
        tracing::debug!("registered {} resource {}", resource.kind, resource.id);
        self.store.insert_resource(
            resource.id.clone(),
            Arc::new(RwLock::new(ResourceState::new(resource))),
        );
        Ok(())
    }

    /// Flip a resource between available and maintenance. Existing
    /// commitments are left in place; only new admissions are refused.
    pub async fn set_resource_status(
        &self,
        id: &str,
        status: ResourceStatus,
    ) -> Result<Resource, EngineError> {
        let rs = self.resource_state(id)?;
        let mut guard = rs.write().await;
        if !self.store.is_current(id, &rs) {
            return Err(EngineError::NotFound(Entity::Resource(id.to_string())));
        }
        if guard.resource.status != status {
            let event = Event::ResourceStatusChanged {
                id: id.to_string(),
                status,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            tracing::info!("resource {id} is now {status}");
        }
        Ok(guard.resource.clone())
    }

    pub async fn get_resource(&self, id: &str) -> Result<Resource, EngineError> {
        let rs = self.resource_state(id)?;
        let guard = rs.read().await;
        Ok(guard.resource.clone())
    }

    /// Every registered resource, ordered by id.
    pub async fn list_resources(&self) -> Vec<Resource> {
        let mut out = Vec::with_capacity(self.store.resource_count());
        for id in self.store.resource_ids() {
            if let Some(rs) = self.store.get_resource(&id) {
                out.push(rs.read().await.resource.clone());
            }
        }
        out
    }

    /// Unregister a resource that no longer carries any commitment.
    pub async fn remove_resource(&self, id: &str) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let rs = self.resource_state(id)?;
        let guard = rs.write().await;
        if guard.commitment_count() > 0 {
            return Err(EngineError::HasCommitments(id.to_string()));
        }
        let event = Event::ResourceRemoved { id: id.to_string() };
        self.wal_append(&event).await?;
        self.store.remove_resource(id);
        tracing::debug!("removed resource {id}");
        Ok(())
    }

    pub(super) fn resource_state(&self, id: &str) -> Result<SharedResourceState, EngineError> {
        self.store
            .get_resource(id)
            .ok_or_else(|| EngineError::NotFound(Entity::Resource(id.to_string())))
    }
}
