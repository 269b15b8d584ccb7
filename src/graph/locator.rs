//! Locators address one branch target, commit graph, or node without ever handing out
//! a direct reference across an await point; every lookup goes back through
//! [`super::model::RepoGraph`] under its single mutex.

use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, Result};
use crate::ids::{BranchName, GoalId, NodeId};

use super::model::{BranchTarget, CommitGraph, CommitGraphNode, RepoGraph};

/// Addresses one `BranchTarget`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchTargetLocator {
    pub branch_name: BranchName,
}

/// Addresses one `CommitGraph`: a (branch target, goal) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitGraphLocator {
    pub branch_name: BranchName,
    pub goal_id: GoalId,
}

impl CommitGraphLocator {
    pub fn new(branch_name: BranchName, goal_id: GoalId) -> Self {
        Self {
            branch_name,
            goal_id,
        }
    }
}

/// Addresses one `CommitGraphNode`: the finest-grained locator, used by every §4.2
/// mutation operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeLocator {
    pub branch_name: BranchName,
    pub goal_id: GoalId,
    pub node_id: NodeId,
}

impl NodeLocator {
    pub fn new(branch_name: BranchName, goal_id: GoalId, node_id: NodeId) -> Self {
        Self {
            branch_name,
            goal_id,
            node_id,
        }
    }

    pub fn graph_locator(&self) -> CommitGraphLocator {
        CommitGraphLocator::new(self.branch_name.clone(), self.goal_id.clone())
    }
}

/// Coordinated mutable access to all three levels addressed by one [`NodeLocator`].
///
/// Holds `graph` plus the target `node_id` rather than a second, separately-derived
/// `&mut CommitGraphNode` — that node lives inside `graph.nodes`, so a field holding
/// both would alias the same memory two ways at once. [`NodeSlice::node`]/`node_mut`
/// re-look-up the entry on demand instead; the map lookup is cheap next to a broker
/// round trip. `branch_name`/`parent_branch_name` are copied out of the owning
/// `BranchTarget` for the same reason one level up; branch targets are immutable after
/// creation (a new one is inserted directly on `RepoGraph`, never rewritten in place),
/// so a copy is equivalent to a live reference for every caller here.
pub struct NodeSlice<'a> {
    pub branch_name: BranchName,
    pub parent_branch_name: Option<BranchName>,
    pub graph: &'a mut CommitGraph,
    pub node_id: NodeId,
}

impl<'a> NodeSlice<'a> {
    pub fn node(&self) -> &CommitGraphNode {
        self.graph
            .nodes
            .get(&self.node_id)
            .expect("locator-addressed node removed out from under an open NodeSlice")
    }

    pub fn node_mut(&mut self) -> &mut CommitGraphNode {
        self.graph
            .nodes
            .get_mut(&self.node_id)
            .expect("locator-addressed node removed out from under an open NodeSlice")
    }
}

/// Coordinated mutable access to a branch target's identity and one of its subgraphs.
pub struct CommitGraphSlice<'a> {
    pub branch_name: BranchName,
    pub parent_branch_name: Option<BranchName>,
    pub graph: &'a mut CommitGraph,
}

/// Mutable access to one branch target.
pub struct BranchTargetSlice<'a> {
    pub branch_target: &'a mut BranchTarget,
}

impl RepoGraph {
    pub fn locate_branch_target(
        &mut self,
        locator: &BranchTargetLocator,
    ) -> Result<BranchTargetSlice<'_>> {
        let branch_target = self
            .branch_targets
            .get_mut(&locator.branch_name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("branch target {}", locator.branch_name)))?;
        Ok(BranchTargetSlice { branch_target })
    }

    pub fn locate_graph(&mut self, locator: &CommitGraphLocator) -> Result<CommitGraphSlice<'_>> {
        let branch_target = self
            .branch_targets
            .get_mut(&locator.branch_name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("branch target {}", locator.branch_name)))?;
        let branch_name = branch_target.branch_name.clone();
        let parent_branch_name = branch_target.parent_branch_name.clone();
        let graph = branch_target
            .subgraphs
            .get_mut(&locator.goal_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("commit graph {}", locator.goal_id)))?;
        Ok(CommitGraphSlice {
            branch_name,
            parent_branch_name,
            graph,
        })
    }

    pub fn locate_node(&mut self, locator: &NodeLocator) -> Result<NodeSlice<'_>> {
        let branch_target = self
            .branch_targets
            .get_mut(&locator.branch_name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("branch target {}", locator.branch_name)))?;
        let branch_name = branch_target.branch_name.clone();
        let parent_branch_name = branch_target.parent_branch_name.clone();
        let graph = branch_target
            .subgraphs
            .get_mut(&locator.goal_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("commit graph {}", locator.goal_id)))?;
        if !graph.nodes.contains_key(&locator.node_id) {
            return Err(OrchestratorError::NotFound(format!("node {}", locator.node_id)));
        }
        Ok(NodeSlice {
            branch_name,
            parent_branch_name,
            graph,
            node_id: locator.node_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::GoalId;

    #[test]
    fn locate_node_reaches_the_root_node_of_a_fresh_graph() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal_id = GoalId::new();
        let graph = CommitGraph::new(goal_id.clone());
        let root_node_id = graph.root_node.clone();
        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);

        let locator = NodeLocator::new(root_branch, goal_id, root_node_id.clone());
        let slice = repo.locate_node(&locator).unwrap();
        assert_eq!(slice.node().id, root_node_id);
    }

    #[test]
    fn locate_node_on_an_unknown_branch_is_not_found() {
        let mut repo = RepoGraph::new(BranchName::new());
        let locator = NodeLocator::new(BranchName::new(), GoalId::new(), NodeId::new());
        assert!(matches!(
            repo.locate_node(&locator),
            Err(OrchestratorError::NotFound(_))
        ));
    }
}
