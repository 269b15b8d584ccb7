//! Periodic and shutdown persistence of a `RepoGraph` to a single, self-contained,
//! version-free JSON document (§6 "Persistent snapshot").

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::errors::Result;
use crate::ids::{BranchName, RepoGraphId};

use super::model::{BranchTarget, RepoGraph};

/// The serialisable shape of a [`RepoGraph`]. Distinct from `RepoGraph` itself because
/// the live aggregate also carries the advertisement channel, which has no meaningful
/// on-disk representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoGraphSnapshot {
    pub id: RepoGraphId,
    pub created_at: DateTime<Utc>,
    pub branch_targets: HashMap<BranchName, BranchTarget>,
}

impl RepoGraphSnapshot {
    pub fn from_repo_graph(repo: &RepoGraph) -> Self {
        Self {
            id: repo.id.clone(),
            created_at: repo.created_at,
            branch_targets: repo.branch_targets.clone(),
        }
    }

    /// Restore a `RepoGraph`, with every `Running*` node state reset to its `Awaiting*`
    /// counterpart (`ResetTransientStates`, §4.2): the engines were wiped clean on
    /// restart (§4.1 `Engine::start`), so no `Running*` node actually has a task
    /// in flight anywhere anymore.
    pub fn into_repo_graph(mut self) -> RepoGraph {
        for branch_target in self.branch_targets.values_mut() {
            for graph in branch_target.subgraphs.values_mut() {
                for node in graph.nodes.values_mut() {
                    super::transitions::reset_transient_state(node);
                }
            }
        }
        let root_branch = self
            .branch_targets
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(BranchName::new);
        let mut repo = RepoGraph::new(root_branch);
        repo.id = self.id;
        repo.created_at = self.created_at;
        repo.branch_targets = self.branch_targets;
        repo
    }
}

/// Write `repo` to `path` atomically: serialise to a sibling temp file, then rename
/// over the destination so a reader never observes a half-written snapshot.
pub async fn save_atomically(repo: &RepoGraph, path: &Path) -> Result<()> {
    let snapshot = RepoGraphSnapshot::from_repo_graph(repo);
    let json = serde_json::to_vec_pretty(&snapshot)?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.flush().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn load(path: &Path) -> Result<RepoGraph> {
    let bytes = tokio::fs::read(path).await?;
    let snapshot: RepoGraphSnapshot = serde_json::from_slice(&bytes)?;
    Ok(snapshot.into_repo_graph())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::CommitGraph;
    use crate::graph::model::NodeState;
    use crate::ids::GoalId;

    #[tokio::test]
    async fn snapshot_round_trips_through_a_temp_file_and_resets_running_states() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal_id = GoalId::new();
        let mut graph = CommitGraph::new(goal_id.clone());
        let root_node = graph.nodes.get_mut(&graph.root_node.clone()).unwrap();
        root_node.state = NodeState::RunningGoalSetup;
        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id, graph);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        save_atomically(&repo, &path).await.unwrap();
        let restored = load(&path).await.unwrap();

        let restored_graph = restored
            .branch_targets
            .get(&root_branch)
            .unwrap()
            .subgraphs
            .values()
            .next()
            .unwrap();
        let restored_root = restored_graph.nodes.get(&restored_graph.root_node).unwrap();
        assert_eq!(restored_root.state, NodeState::AwaitingGoalSetup);
    }
}
