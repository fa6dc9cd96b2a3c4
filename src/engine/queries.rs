use crate::model::*;

use super::conflict::resource_conflicts;
use super::{Engine, EngineError, Entity};

impl Engine {
    /// Retrospective grid report: every cluster of two or more overlapping
    /// commitments, per resource and realized day.
    ///
    /// Ordered by resource id, then day (weekdays before dates), then window
    /// start. Calling it twice on unchanged state yields identical output.
    pub async fn find_all_conflicts(
        &self,
        resource_filter: Option<&str>,
    ) -> Result<Vec<ConflictGroup>, EngineError> {
        let ids = match resource_filter {
            Some(id) => {
                if !self.store.contains_resource(id) {
                    return Err(EngineError::NotFound(Entity::Resource(id.to_string())));
                }
                vec![id.to_string()]
            }
            None => self.store.resource_ids(),
        };

        let mut groups = Vec::new();
        for id in ids {
            let Some(rs) = self.store.get_resource(&id) else {
                continue;
            };
            let guard = rs.read().await;
            groups.extend(resource_conflicts(&guard));
        }
        metrics::counter!(crate::observability::CONFLICT_GROUPS_REPORTED_TOTAL)
            .increment(groups.len() as u64);
        Ok(groups)
    }
}
