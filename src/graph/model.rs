//! The repo/commit graph data model (§3, §4.2): `RepoGraph` → `BranchTarget` →
//! `CommitGraph` → `CommitGraphNode`, all cross-referenced by id, never by handle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::actions::ParsedOutput;
use crate::compilation::{ActionOutput, CompilationResultMsg};
use crate::ids::{BranchName, GoalId, NodeId, RepoGraphId};

use super::locator::CommitGraphLocator;

/// A node's position in its state machine (§4.2 "State transitions (node)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    AwaitingGoalSetup,
    RunningGoalSetup,
    AwaitingCompilation,
    RunningCompilation,
    AwaitingInference,
    RunningInference,
    Done,
}

/// The outcome recorded on a `Done` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeResult {
    None,
    Success,
    Failure,
    SyntaxFailure,
    DepthExhaustionFailure,
    ContextExhaustionFailure,
    Terminated,
}

/// Manual annotations an operator can attach to a node through the HTTP surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub favourite: bool,
    pub golden_sample: bool,
    pub label: Option<String>,
    pub was_manually_created: bool,
}

/// A position in exploration: one attempt at continuing a branch toward a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitGraphNode {
    pub id: NodeId,
    pub created_at: DateTime<Utc>,
    pub depth: u32,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub state: NodeState,
    pub result: NodeResult,
    pub termination_requested: bool,
    pub inference_output: Option<ParsedOutput>,
    pub action_outputs: Vec<ActionOutput>,
    pub compilation_result: Option<CompilationResultMsg>,
    /// Unique per node; populated once a `git-commit` action establishes a new identity.
    pub branch_name: Option<BranchName>,
    pub metadata: NodeMetadata,
    pub model_reference: Option<String>,
}

impl CommitGraphNode {
    pub fn new_root() -> Self {
        Self {
            id: NodeId::new(),
            created_at: Utc::now(),
            depth: 0,
            parent: None,
            children: Vec::new(),
            state: NodeState::AwaitingGoalSetup,
            result: NodeResult::None,
            termination_requested: false,
            inference_output: None,
            action_outputs: Vec::new(),
            compilation_result: None,
            branch_name: None,
            metadata: NodeMetadata::default(),
            model_reference: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == NodeState::Done
    }

    /// A freshly minted child, born `AwaitingCompilation` by default; callers flip it
    /// to `Done/SyntaxFailure` when the inference output it carries fails to parse.
    pub fn new_child(parent: NodeId, depth: u32) -> Self {
        Self {
            id: NodeId::new(),
            created_at: Utc::now(),
            depth,
            parent: Some(parent),
            children: Vec::new(),
            state: NodeState::AwaitingCompilation,
            result: NodeResult::None,
            termination_requested: false,
            inference_output: None,
            action_outputs: Vec::new(),
            compilation_result: None,
            branch_name: Some(BranchName::new()),
            metadata: NodeMetadata::default(),
            model_reference: None,
        }
    }
}

/// A coalesced record of one successful exploration outcome: a diff patch and every
/// node whose `git-commit` produced it (§3, invariant: unique `diff_patch` per graph).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CGResult {
    pub branch_target: BranchName,
    pub diff_patch: String,
    pub generating_nodes: Vec<NodeId>,
}

/// Overall state of one (branch target, goal) exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitGraphState {
    AwaitingGoalSetup,
    InProgress,
    Success,
    Failed,
    GoalSetupFailed,
}

/// Per-(branch_target, goal) exploration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitGraph {
    pub goal_id: GoalId,
    pub root_node: NodeId,
    pub state: CommitGraphState,
    pub nodes: HashMap<NodeId, CommitGraphNode>,
    pub results: Vec<CGResult>,
}

impl CommitGraph {
    pub fn new(goal_id: GoalId) -> Self {
        let root = CommitGraphNode::new_root();
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            goal_id,
            root_node: root_id,
            state: CommitGraphState::AwaitingGoalSetup,
            nodes,
            results: Vec::new(),
        }
    }

    /// Recompute [`CommitGraphState`] from the current node set (§4.2 invariant):
    /// `Success` iff every node is `Done` and at least one succeeded; `Failed` iff every
    /// node is `Done` and none did; otherwise left as `InProgress` (or `GoalSetupFailed`,
    /// which only `HandleSetupCompilationOutput` sets directly).
    pub fn recompute_state(&mut self) {
        if self.state == CommitGraphState::GoalSetupFailed {
            return;
        }
        let all_done = self.nodes.values().all(|n| n.is_done());
        if !all_done {
            if self.state == CommitGraphState::AwaitingGoalSetup {
                return;
            }
            self.state = CommitGraphState::InProgress;
            return;
        }
        let any_success = self
            .nodes
            .values()
            .any(|n| n.result == NodeResult::Success);
        self.state = if any_success {
            CommitGraphState::Success
        } else {
            CommitGraphState::Failed
        };
    }

    pub fn is_unfinished(&self) -> bool {
        matches!(
            self.state,
            CommitGraphState::AwaitingGoalSetup | CommitGraphState::InProgress
        )
    }
}

/// A node in the outer DAG of branch identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchTarget {
    pub branch_name: BranchName,
    pub created_at: DateTime<Utc>,
    pub parent_branch_name: Option<BranchName>,
    pub traversal_goal_id: Option<GoalId>,
    pub subgraphs: HashMap<GoalId, CommitGraph>,
}

impl BranchTarget {
    pub fn root(branch_name: BranchName) -> Self {
        Self {
            branch_name,
            created_at: Utc::now(),
            parent_branch_name: None,
            traversal_goal_id: None,
            subgraphs: HashMap::new(),
        }
    }

    pub fn child(
        branch_name: BranchName,
        parent_branch_name: BranchName,
        traversal_goal_id: GoalId,
    ) -> Self {
        Self {
            branch_name,
            created_at: Utc::now(),
            parent_branch_name: Some(parent_branch_name),
            traversal_goal_id: Some(traversal_goal_id),
            subgraphs: HashMap::new(),
        }
    }

    /// Count of in-progress, successful, and failed subgraphs — the raw counters the
    /// weighting function (§4.2) consumes. `GoalSetupFailed` subgraphs are excluded
    /// from all three per the weighting formula's Open Question resolution ([[graph-weighting]]
    /// in the design ledger): they are neither a success nor a failure signal about the
    /// branch target itself.
    pub fn counters(&self) -> BranchTargetCounters {
        let mut counters = BranchTargetCounters::default();
        for subgraph in self.subgraphs.values() {
            match subgraph.state {
                CommitGraphState::InProgress | CommitGraphState::AwaitingGoalSetup => {
                    counters.in_progress += 1
                }
                CommitGraphState::Success => counters.succ += 1,
                CommitGraphState::Failed => counters.fail += 1,
                CommitGraphState::GoalSetupFailed => {}
            }
        }
        counters
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BranchTargetCounters {
    pub succ: u64,
    pub fail: u64,
    pub in_progress: u64,
}

/// Root aggregate: owns every branch target, which own their subgraphs, which own
/// their nodes. The bounded advertisement channel is lossy by design — once the
/// receiver (the training TX loop) is gone or full during shutdown, emits are dropped
/// rather than block a graph mutation.
pub struct RepoGraph {
    pub id: RepoGraphId,
    pub created_at: DateTime<Utc>,
    pub branch_targets: HashMap<BranchName, BranchTarget>,
    advertisement_tx: mpsc::Sender<CommitGraphLocator>,
    advertisement_rx: Option<mpsc::Receiver<CommitGraphLocator>>,
}

impl RepoGraph {
    pub fn new(root_branch: BranchName) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let mut branch_targets = HashMap::new();
        branch_targets.insert(root_branch.clone(), BranchTarget::root(root_branch));
        Self {
            id: RepoGraphId::new(),
            created_at: Utc::now(),
            branch_targets,
            advertisement_tx: tx,
            advertisement_rx: Some(rx),
        }
    }

    /// Take the advertisement receiver. Callable exactly once; the training TX loop
    /// owns it for the lifetime of the orchestrator.
    pub fn take_advertisement_receiver(&mut self) -> Option<mpsc::Receiver<CommitGraphLocator>> {
        self.advertisement_rx.take()
    }

    /// Emit a locator on the advertisement channel, dropping it silently if the channel
    /// is full or closed (§4.2: "dropping if shutdown has begun").
    pub fn advertise(&self, locator: CommitGraphLocator) {
        let _ = self.advertisement_tx.try_send(locator);
    }

    pub fn unfinished_graph_count(&self) -> usize {
        self.branch_targets
            .values()
            .flat_map(|bt| bt.subgraphs.values())
            .filter(|g| g.is_unfinished())
            .count()
    }
}
