//! GRPO-style advantage extraction (§4.4): turn one `Success` subgraph into a set of
//! per-parent training groups, each carrying a reward-normalised advantage per child.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::actions::to_xml;
use crate::errors::Result;
use crate::goal::Goal;
use crate::graph::model::{CommitGraph, NodeResult};
use crate::graph::{CommitGraphLocator, NodeLocator, RepoGraph};
use crate::ids::{NodeId, RepoGraphId, TrainingGroupId};
use crate::prompt::build_inference_task_for_node;

const EPS: f64 = 1e-6;

/// One child's contribution to a training group: its raw success/failure reward and
/// the backprop-normalised advantage it ends up training against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedOutputData {
    pub node_id: NodeId,
    pub completion: String,
    pub raw_reward: f64,
    pub advantage: f64,
}

/// One non-terminal parent's training group: its prompt plus every child's weighted
/// output. `id` encodes the repo id and the parent's locator so it is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingGroup {
    pub id: TrainingGroupId,
    pub parent_locator: NodeLocator,
    pub prompt: String,
    pub outputs: Vec<WeightedOutputData>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn training_group_id(repo_id: &RepoGraphId, locator: &NodeLocator) -> TrainingGroupId {
    TrainingGroupId::from_raw(format!(
        "{}{repo_id}|{}|{}|{}",
        TrainingGroupId::PREFIX,
        locator.branch_name,
        locator.goal_id,
        locator.node_id
    ))
}

/// Compute each non-root node's backprop value, bottom-up: a leaf's value is its
/// reward-normalised `raw_advantage` (§4.4 step 3); an internal node's value is the
/// sum of its own children's values, once every one of them has a value (step 4).
/// Processing nodes deepest-first guarantees that precondition without an explicit
/// "seen" worklist — a node's children are always strictly deeper than it.
fn backprop_values(graph: &CommitGraph) -> HashMap<NodeId, f64> {
    let mut raw_reward: HashMap<NodeId, f64> = HashMap::new();
    for node in graph.nodes.values() {
        if node.parent.is_some() {
            raw_reward.insert(
                node.id.clone(),
                if node.result == NodeResult::Success { 1.0 } else { 0.0 },
            );
        }
    }
    let rewards: Vec<f64> = raw_reward.values().copied().collect();
    let reward_mean = mean(&rewards);
    let reward_std = stddev(&rewards, reward_mean);

    let mut value: HashMap<NodeId, f64> = HashMap::new();
    for (id, reward) in &raw_reward {
        let v = if *reward > 0.0 {
            (reward - reward_mean) / (reward_std + EPS)
        } else {
            0.0
        };
        value.insert(id.clone(), v);
    }

    let mut by_depth: Vec<&crate::graph::model::CommitGraphNode> = graph.nodes.values().collect();
    by_depth.sort_by(|a, b| b.depth.cmp(&a.depth));
    for node in by_depth {
        if node.children.is_empty() || node.parent.is_none() {
            continue;
        }
        let sum: f64 = node
            .children
            .iter()
            .map(|child_id| *value.get(child_id).unwrap_or(&0.0))
            .sum();
        value.insert(node.id.clone(), sum);
    }

    value
}

/// Extract every non-dropped training group from one `Success` subgraph (§4.4).
///
/// `graph_locator` addresses the subgraph; `repo_id` and `goal` are needed to build
/// each group's id and each parent's prompt. Groups whose children's advantages are
/// all (within `EPS`) zero are dropped per step 6.
pub fn extract_training_groups(
    repo: &mut RepoGraph,
    repo_id: &RepoGraphId,
    graph_locator: &CommitGraphLocator,
    goal: &Goal,
) -> Result<Vec<TrainingGroup>> {
    let graph = repo.locate_graph(graph_locator)?.graph.clone();
    let value = backprop_values(&graph);

    let mut groups = Vec::new();
    for node in graph.nodes.values() {
        if node.children.is_empty() {
            continue;
        }
        let child_values: Vec<f64> = node
            .children
            .iter()
            .map(|id| *value.get(id).unwrap_or(&0.0))
            .collect();
        let group_mean = mean(&child_values);
        let group_std = stddev(&child_values, group_mean);
        let advantages: Vec<f64> = child_values
            .iter()
            .map(|v| (v - group_mean) / (group_std + EPS))
            .collect();
        if advantages.iter().all(|a| a.abs() < EPS) {
            continue;
        }

        let parent_locator = NodeLocator::new(
            graph_locator.branch_name.clone(),
            graph_locator.goal_id.clone(),
            node.id.clone(),
        );
        let prompt = build_inference_task_for_node(repo, &parent_locator, goal)?.prompt;

        let outputs = node
            .children
            .iter()
            .zip(advantages)
            .map(|(child_id, advantage)| {
                let child = &graph.nodes[child_id];
                WeightedOutputData {
                    node_id: child_id.clone(),
                    completion: child
                        .inference_output
                        .as_ref()
                        .map(to_xml)
                        .unwrap_or_default(),
                    raw_reward: if child.result == NodeResult::Success { 1.0 } else { 0.0 },
                    advantage,
                }
            })
            .collect();

        groups.push(TrainingGroup {
            id: training_group_id(repo_id, &parent_locator),
            parent_locator,
            prompt,
            outputs,
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::Goal;
    use crate::graph::model::{CommitGraphNode, CommitGraphState, NodeState, RepoGraph};
    use crate::ids::BranchName;

    fn done_child(parent: NodeId, depth: u32, result: NodeResult) -> CommitGraphNode {
        let mut node = CommitGraphNode::new_child(parent, depth);
        node.state = NodeState::Done;
        node.result = result;
        node
    }

    /// Builds the literal scenario from §8 end-to-end scenario 6: parent P with three
    /// children A(success), B(success), C(failure); A and B each have three terminal
    /// grandchildren (two success, one failure total).
    fn build_advantage_scenario() -> (RepoGraph, CommitGraphLocator, Goal) {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal = Goal::new("refactor the parser", "git checkout -b attempt");
        let goal_id = goal.id.clone();
        let mut graph = CommitGraph::new(goal_id.clone());
        graph.state = CommitGraphState::Success;

        let root_id = graph.root_node.clone();
        {
            let root = graph.nodes.get_mut(&root_id).unwrap();
            root.state = NodeState::Done;
            root.result = NodeResult::Success;
        }

        let mut p = CommitGraphNode::new_child(root_id.clone(), 1);
        p.state = NodeState::Done;
        p.result = NodeResult::Success;
        let p_id = p.id.clone();

        let mut a = done_child(p_id.clone(), 2, NodeResult::Success);
        let a_id = a.id.clone();
        let mut b = done_child(p_id.clone(), 2, NodeResult::Success);
        let b_id = b.id.clone();
        let c = done_child(p_id.clone(), 2, NodeResult::Failure);

        // A's three terminal grandchildren: one success, two failure.
        let ga1 = done_child(a_id.clone(), 3, NodeResult::Success);
        let ga2 = done_child(a_id.clone(), 3, NodeResult::Failure);
        let ga3 = done_child(a_id.clone(), 3, NodeResult::Failure);
        a.children = vec![ga1.id.clone(), ga2.id.clone(), ga3.id.clone()];

        // B's three terminal grandchildren: one success, two failure.
        let gb1 = done_child(b_id.clone(), 3, NodeResult::Success);
        let gb2 = done_child(b_id.clone(), 3, NodeResult::Failure);
        let gb3 = done_child(b_id.clone(), 3, NodeResult::Failure);
        b.children = vec![gb1.id.clone(), gb2.id.clone(), gb3.id.clone()];

        p.children = vec![a_id.clone(), b_id.clone(), c.id.clone()];
        {
            let root = graph.nodes.get_mut(&root_id).unwrap();
            root.children.push(p_id.clone());
        }

        for node in [p, a, b, c, ga1, ga2, ga3, gb1, gb2, gb3] {
            graph.nodes.insert(node.id.clone(), node);
        }

        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);

        (repo, CommitGraphLocator::new(root_branch, goal_id), goal)
    }

    #[test]
    fn advantage_normalisation_scenario_sums_to_zero() {
        let (mut repo, locator, goal) = build_advantage_scenario();
        let repo_id = repo.id.clone();
        let groups = extract_training_groups(&mut repo, &repo_id, &locator, &goal).unwrap();

        let p_group = groups
            .iter()
            .find(|g| g.outputs.len() == 3)
            .expect("expected a 3-output group for parent P");
        let sum: f64 = p_group.outputs.iter().map(|o| o.advantage).sum();
        assert!(sum.abs() < 1e-6, "advantages should sum to ~0, got {sum}");
    }

    #[test]
    fn backprop_is_idempotent() {
        let (mut repo, locator, goal) = build_advantage_scenario();
        let repo_id = repo.id.clone();
        let first = extract_training_groups(&mut repo, &repo_id, &locator, &goal).unwrap();
        let second = extract_training_groups(&mut repo, &repo_id, &locator, &goal).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            for (oa, ob) in a.outputs.iter().zip(b.outputs.iter()) {
                assert!((oa.advantage - ob.advantage).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn drops_groups_with_uniformly_zero_advantage() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal = Goal::new("no-op goal", "true");
        let goal_id = goal.id.clone();
        let mut graph = CommitGraph::new(goal_id.clone());
        graph.state = CommitGraphState::Success;
        let root_id = graph.root_node.clone();
        {
            let root = graph.nodes.get_mut(&root_id).unwrap();
            root.state = NodeState::Done;
            root.result = NodeResult::Success;
        }
        // Every child fails identically: reward is uniformly zero, advantage uniformly
        // zero, so the group should be dropped.
        let c1 = done_child(root_id.clone(), 1, NodeResult::Failure);
        let c2 = done_child(root_id.clone(), 1, NodeResult::Failure);
        {
            let root = graph.nodes.get_mut(&root_id).unwrap();
            root.children = vec![c1.id.clone(), c2.id.clone()];
        }
        graph.nodes.insert(c1.id.clone(), c1);
        graph.nodes.insert(c2.id.clone(), c2);
        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);

        let repo_id = repo.id.clone();
        let locator = CommitGraphLocator::new(root_branch, goal_id);
        let groups = extract_training_groups(&mut repo, &repo_id, &locator, &goal).unwrap();
        assert!(groups.is_empty());
    }
}
