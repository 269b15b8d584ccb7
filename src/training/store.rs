//! The in-memory training advertisement store (§4.3, §5): keyed by group id, guarded
//! by a reader/writer mutex so a request-service read never contends with graph
//! mutations under `G`.

use dashmap::DashMap;

use crate::ids::TrainingGroupId;

use super::advantage::TrainingGroup;

/// Keeps every advertised [`TrainingGroup`] payload in memory until a trainer requests
/// it by id. `dashmap` gives per-shard locking, matching the spec's "reads during
/// request-service are lock-free of `G`" requirement without a single coarse mutex.
#[derive(Default)]
pub struct AdvertisementStore {
    groups: DashMap<TrainingGroupId, TrainingGroup>,
}

impl AdvertisementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, group: TrainingGroup) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Look up a group by id without removing it; unknown ids return `None` so the
    /// caller can log-and-skip per the Training RX loop's contract.
    pub fn get(&self, id: &TrainingGroupId) -> Option<TrainingGroup> {
        self.groups.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeLocator;
    use crate::ids::{BranchName, GoalId, NodeId};

    fn sample_group(id: TrainingGroupId) -> TrainingGroup {
        TrainingGroup {
            id,
            parent_locator: NodeLocator::new(BranchName::new(), GoalId::new(), NodeId::new()),
            prompt: "prompt".into(),
            outputs: vec![],
        }
    }

    #[test]
    fn stores_and_retrieves_by_id() {
        let store = AdvertisementStore::new();
        let id = TrainingGroupId::new();
        store.insert(sample_group(id.clone()));
        assert!(store.get(&id).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_id_returns_none() {
        let store = AdvertisementStore::new();
        assert!(store.get(&TrainingGroupId::new()).is_none());
    }
}
