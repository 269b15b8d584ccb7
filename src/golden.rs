//! Golden samples (§6, GLOSSARY): manually flagged (prompt, completion) pairs exported
//! for supervised reference, surfaced through the HTTP "save a golden sample" mutator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::actions::to_xml;
use crate::errors::Result;
use crate::goal::Goal;
use crate::graph::{NodeLocator, RepoGraph};
use crate::ids::GoldenSampleId;
use crate::prompt::build_inference_task_for_node;

/// One manually flagged (prompt, completion) reference pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenSample {
    pub id: GoldenSampleId,
    pub created_at: DateTime<Utc>,
    pub source: NodeLocator,
    pub prompt: String,
    pub completion: String,
}

/// Flag `locator`'s node as a golden sample and capture its (prompt, completion) pair.
///
/// The node's own prompt — what was sent to the model to produce it — comes from
/// [`build_inference_task_for_node`] run against its *parent*; the completion is the
/// node's own inference output rendered back to canonical XML.
pub fn save_golden_sample(repo: &mut RepoGraph, locator: &NodeLocator, goal: &Goal) -> Result<GoldenSample> {
    let parent_locator = {
        let slice = repo.locate_node(locator)?;
        slice.node().parent.clone().map(|parent_id| {
            NodeLocator::new(locator.branch_name.clone(), locator.goal_id.clone(), parent_id)
        })
    };
    let prompt = match &parent_locator {
        Some(parent_locator) => build_inference_task_for_node(repo, parent_locator, goal)?.prompt,
        None => String::new(),
    };

    let mut slice = repo.locate_node(locator)?;
    let completion = slice
        .node()
        .inference_output
        .as_ref()
        .map(to_xml)
        .unwrap_or_default();
    slice.node_mut().metadata.golden_sample = true;

    Ok(GoldenSample {
        id: GoldenSampleId::new(),
        created_at: Utc::now(),
        source: locator.clone(),
        prompt,
        completion,
    })
}

/// In-memory store of every golden sample saved this process lifetime, keyed by id.
#[derive(Default)]
pub struct GoldenSampleStore {
    samples: DashMap<GoldenSampleId, GoldenSample>,
}

impl GoldenSampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sample: GoldenSample) {
        self.samples.insert(sample.id.clone(), sample);
    }

    pub fn all(&self) -> Vec<GoldenSample> {
        self.samples.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::model::{CommitGraph, NodeState};
    use crate::ids::BranchName;

    #[test]
    fn saving_a_golden_sample_flags_the_node_and_captures_its_completion() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal = Goal::new("write a parser", "true");
        let goal_id = goal.id.clone();
        let mut graph = CommitGraph::new(goal_id.clone());
        let root_id = graph.root_node.clone();
        graph.nodes.get_mut(&root_id).unwrap().state = NodeState::AwaitingCompilation;
        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);

        let locator = NodeLocator::new(root_branch, goal_id, root_id);
        let sample = save_golden_sample(&mut repo, &locator, &goal).unwrap();
        assert!(sample.completion.is_empty()); // root has no inference_output of its own

        let slice = repo.locate_node(&locator).unwrap();
        assert!(slice.node().metadata.golden_sample);

        let store = GoldenSampleStore::new();
        store.insert(sample);
        assert_eq!(store.all().len(), 1);
    }
}
