//! The graph mutation operations of §4.2: setup/inference/compilation result
//! handlers, termination cascade, and crash-recovery state reset.

use crate::actions::parse_model_output;
use crate::compilation::{CompilationResultMsg, InferenceResultMsg};
use crate::errors::{OrchestratorError, Result};
use crate::goal::Goal;
use crate::ids::NodeId;

use super::locator::NodeLocator;
use super::model::{
    BranchTarget, CGResult, CommitGraph, CommitGraphNode, CommitGraphState, NodeResult, NodeState,
    RepoGraph,
};

/// `true` if `node` is in `expected`, `false` if it is absorbed silently (already
/// `Done/Terminated` — a stray late result for a node that was already torn down), and
/// an error for any other mismatch (genuine state-machine misuse, §7).
fn guard_running(node: &CommitGraphNode, expected: NodeState) -> Result<bool> {
    if node.state == expected {
        return Ok(true);
    }
    if node.state == NodeState::Done && node.result == NodeResult::Terminated {
        return Ok(false);
    }
    Err(OrchestratorError::InvalidTransition(format!(
        "expected node in state {expected:?}, found {:?}/{:?}",
        node.state, node.result
    )))
}

/// §4.2 `HandleSetupCompilationOutput`. Only valid while the node is
/// `RunningGoalSetup` and the graph is `AwaitingGoalSetup`.
pub fn handle_setup_compilation_output(
    repo: &mut RepoGraph,
    locator: &NodeLocator,
    setup_result: CompilationResultMsg,
    goal: &Goal,
) -> Result<()> {
    let mut slice = repo.locate_node(locator)?;
    if !guard_running(slice.node(), NodeState::RunningGoalSetup)? {
        return Ok(());
    }
    if slice.graph.state != CommitGraphState::AwaitingGoalSetup {
        return Err(OrchestratorError::InvalidTransition(
            "HandleSetupCompilationOutput requires graph state AwaitingGoalSetup".into(),
        ));
    }

    if goal.validate_setup(&setup_result) {
        let node = slice.node_mut();
        node.compilation_result = Some(setup_result);
        node.state = NodeState::AwaitingInference;
        slice.graph.state = CommitGraphState::InProgress;
    } else {
        slice.graph.state = CommitGraphState::GoalSetupFailed;
    }
    Ok(())
}

/// §4.2 `HandleInferenceOutput`. For each returned sequence, mints a child via
/// `AddNodeToCommitGraph`; the parent becomes `Done` once its children are spawned.
pub fn handle_inference_output(
    repo: &mut RepoGraph,
    locator: &NodeLocator,
    inference_result: InferenceResultMsg,
) -> Result<()> {
    let mut slice = repo.locate_node(locator)?;
    if !guard_running(slice.node(), NodeState::RunningInference)? {
        return Ok(());
    }

    let parent_id = locator.node_id.clone();
    for sequence in &inference_result.return_sequences {
        add_node_to_commit_graph(slice.graph, &parent_id, sequence);
    }

    slice.node_mut().state = NodeState::Done;
    slice.graph.recompute_state();
    Ok(())
}

/// Mint a new `NodeID`/`BranchName`, parse `sequence`, and append the resulting child
/// to `parent_id`'s children. A parse-or-validation failure still produces a node — it
/// is simply born terminal (`Done/SyntaxFailure`) rather than `AwaitingCompilation`.
fn add_node_to_commit_graph(graph: &mut CommitGraph, parent_id: &NodeId, sequence: &str) -> NodeId {
    let parent_depth = graph.nodes.get(parent_id).map(|n| n.depth).unwrap_or(0);
    let mut node = CommitGraphNode::new_child(parent_id.clone(), parent_depth + 1);

    match parse_model_output(sequence) {
        Ok(parsed) => {
            node.inference_output = Some(parsed);
            node.state = NodeState::AwaitingCompilation;
        }
        Err(_) => {
            node.state = NodeState::Done;
            node.result = NodeResult::SyntaxFailure;
        }
    }

    let node_id = node.id.clone();
    graph.nodes.insert(node_id.clone(), node);
    if let Some(parent) = graph.nodes.get_mut(parent_id) {
        parent.children.push(node_id.clone());
    }
    node_id
}

/// §4.2 `HandleCompilationOutput`. Absorbs pre-command outputs; a successful
/// `git-commit` terminates the node with `Success` and produces (or dedupes into) a
/// `CGResult`/new `BranchTarget`; otherwise depth exhaustion or a return to
/// `AwaitingInference`.
pub fn handle_compilation_output(
    repo: &mut RepoGraph,
    locator: &NodeLocator,
    compilation_result: CompilationResultMsg,
    max_depth: u32,
) -> Result<()> {
    enum NewTarget {
        None,
        Create {
            branch_name: crate::ids::BranchName,
            parent_branch_name: crate::ids::BranchName,
            goal_id: crate::ids::GoalId,
        },
    }

    let mut new_target = NewTarget::None;
    let became_success;

    {
        let mut slice = repo.locate_node(locator)?;
        if !guard_running(slice.node(), NodeState::RunningCompilation)? {
            return Ok(());
        }

        let commit_output = compilation_result
            .pre_commands_results
            .iter()
            .find(|r| r.action_name == "git-commit")
            .cloned();

        {
            let node = slice.node_mut();
            node.action_outputs = compilation_result.pre_commands_results.clone();
            node.compilation_result = Some(compilation_result);
        }

        match commit_output {
            Some(commit_output) if commit_output.exit_code == 0 => {
                let diff_patch = commit_output.out;
                let node = slice.node_mut();
                node.state = NodeState::Done;
                node.result = NodeResult::Success;
                let node_branch_name = node.branch_name.clone().ok_or_else(|| {
                    OrchestratorError::InvalidTransition(
                        "git-commit succeeded but node has no branch_name".into(),
                    )
                })?;
                let node_id = node.id.clone();

                if let Some(existing) = slice
                    .graph
                    .results
                    .iter_mut()
                    .find(|r| r.diff_patch == diff_patch)
                {
                    existing.generating_nodes.push(node_id);
                } else {
                    slice.graph.results.push(CGResult {
                        branch_target: node_branch_name.clone(),
                        diff_patch,
                        generating_nodes: vec![node_id],
                    });
                    new_target = NewTarget::Create {
                        branch_name: node_branch_name,
                        parent_branch_name: slice.branch_name.clone(),
                        goal_id: slice.graph.goal_id.clone(),
                    };
                }
            }
            Some(_) => {
                let node = slice.node_mut();
                node.state = NodeState::Done;
                node.result = NodeResult::Failure;
            }
            None => {
                let depth = slice.node().depth;
                let node = slice.node_mut();
                if depth >= max_depth {
                    node.state = NodeState::Done;
                    node.result = NodeResult::DepthExhaustionFailure;
                } else {
                    node.state = NodeState::AwaitingInference;
                }
            }
        }

        slice.graph.recompute_state();
        became_success = slice.graph.state == CommitGraphState::Success;
    }

    if let NewTarget::Create {
        branch_name,
        parent_branch_name,
        goal_id,
    } = new_target
    {
        repo.branch_targets.insert(
            branch_name.clone(),
            BranchTarget::child(branch_name, parent_branch_name, goal_id),
        );
    }

    if became_success {
        repo.advertise(locator.graph_locator());
    }

    Ok(())
}

/// §4.2 `RequestNodeTerminationRecursively`. Sets `termination_requested` on every node
/// in the subtree rooted at `locator`'s node, moving any non-`Done` node to
/// `Done/Terminated`, then ticks the graph once.
pub fn request_node_termination_recursively(repo: &mut RepoGraph, locator: &NodeLocator) -> Result<()> {
    let mut slice = repo.locate_node(locator)?;
    terminate_recursive(slice.graph, locator.node_id.clone());
    slice.graph.recompute_state();
    Ok(())
}

fn terminate_recursive(graph: &mut CommitGraph, node_id: NodeId) {
    let children = match graph.nodes.get_mut(&node_id) {
        Some(node) => {
            node.termination_requested = true;
            if node.state != NodeState::Done {
                node.state = NodeState::Done;
                node.result = NodeResult::Terminated;
            }
            node.children.clone()
        }
        None => return,
    };
    for child in children {
        terminate_recursive(graph, child);
    }
}

/// HTTP admin mutator: delete a terminal leaf node. Rejects non-`Done` nodes and nodes
/// that still have children — cascading deletes are out of scope for a single manual
/// action, and deleting an internal node would orphan its subtree's id references.
pub fn delete_terminal_node(repo: &mut RepoGraph, locator: &NodeLocator) -> Result<()> {
    let mut slice = repo.locate_node(locator)?;
    let node = slice.node();
    if !node.is_done() {
        return Err(OrchestratorError::NotTerminal(format!(
            "node {} is not Done",
            locator.node_id
        )));
    }
    if !node.children.is_empty() {
        return Err(OrchestratorError::NotTerminal(format!(
            "node {} still has children",
            locator.node_id
        )));
    }
    let parent_id = node.parent.clone();
    slice.graph.nodes.remove(&locator.node_id);
    if let Some(parent_id) = parent_id {
        if let Some(parent) = slice.graph.nodes.get_mut(&parent_id) {
            parent.children.retain(|id| id != &locator.node_id);
        }
    }
    slice.graph.recompute_state();
    Ok(())
}

/// HTTP admin mutator: record a manually created child, as if an operator had made a
/// commit by hand. Born `Done/Success` with its own `BranchTarget`/`CGResult`, exactly
/// like a `git-commit`-driven success — it simply skipped the compilation step.
pub fn create_manual_child_node(
    repo: &mut RepoGraph,
    parent_locator: &NodeLocator,
    new_branch_name: crate::ids::BranchName,
    diff_patch: String,
) -> Result<NodeId> {
    let node_id;
    let new_target;
    {
        let mut slice = repo.locate_node(parent_locator)?;
        let parent_depth = slice.node().depth;
        let mut node = CommitGraphNode::new_child(parent_locator.node_id.clone(), parent_depth + 1);
        node.state = NodeState::Done;
        node.result = NodeResult::Success;
        node.branch_name = Some(new_branch_name.clone());
        node.metadata.was_manually_created = true;
        node_id = node.id.clone();

        slice.graph.nodes.insert(node_id.clone(), node);
        slice.node_mut().children.push(node_id.clone());

        if slice.graph.results.iter().any(|r| r.diff_patch == diff_patch) {
            let existing = slice
                .graph
                .results
                .iter_mut()
                .find(|r| r.diff_patch == diff_patch)
                .unwrap();
            existing.generating_nodes.push(node_id.clone());
            new_target = None;
        } else {
            slice.graph.results.push(CGResult {
                branch_target: new_branch_name.clone(),
                diff_patch,
                generating_nodes: vec![node_id.clone()],
            });
            new_target = Some((new_branch_name, slice.branch_name.clone(), slice.graph.goal_id.clone()));
        }
        slice.graph.recompute_state();
    }

    if let Some((branch_name, parent_branch_name, goal_id)) = new_target {
        repo.branch_targets.insert(
            branch_name.clone(),
            BranchTarget::child(branch_name, parent_branch_name, goal_id),
        );
    }
    repo.advertise(parent_locator.graph_locator());
    Ok(node_id)
}

/// HTTP admin mutator: force a commit graph's state directly, bypassing
/// `recompute_state` — used by an operator to mark a stuck or misjudged subgraph
/// `Failed`/`Success` by hand.
pub fn set_commit_graph_state(
    repo: &mut RepoGraph,
    locator: &super::locator::CommitGraphLocator,
    state: CommitGraphState,
) -> Result<()> {
    let slice = repo.locate_graph(locator)?;
    slice.graph.state = state;
    Ok(())
}

/// §4.2 `ResetTransientStates`. Crash recovery for a persisted snapshot: every
/// `Running*` node reverts to its `Awaiting*` counterpart, since the work-distribution
/// engines themselves were already wiped on startup (§4.1) and no in-flight task
/// actually exists anymore.
pub fn reset_transient_state(node: &mut CommitGraphNode) {
    node.state = match node.state {
        NodeState::RunningGoalSetup => NodeState::AwaitingGoalSetup,
        NodeState::RunningCompilation => NodeState::AwaitingCompilation,
        NodeState::RunningInference => NodeState::AwaitingInference,
        other => other,
    };
}

pub fn reset_transient_states(repo: &mut RepoGraph) {
    for branch_target in repo.branch_targets.values_mut() {
        for graph in branch_target.subgraphs.values_mut() {
            for node in graph.nodes.values_mut() {
                reset_transient_state(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::ActionOutput;
    use crate::graph::locator::CommitGraphLocator;
    use crate::ids::{BranchName, GoalId};

    fn setup_graph_with_root_at(repo: &mut RepoGraph, root_branch: &BranchName, state: NodeState) -> (GoalId, NodeId) {
        let goal_id = GoalId::new();
        let mut graph = CommitGraph::new(goal_id.clone());
        let root_id = graph.root_node.clone();
        graph.nodes.get_mut(&root_id).unwrap().state = state;
        repo.branch_targets
            .get_mut(root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);
        (goal_id, root_id)
    }

    #[test]
    fn setup_success_moves_root_to_awaiting_inference_and_graph_in_progress() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::RunningGoalSetup);
        let locator = NodeLocator::new(root_branch, goal_id, root_id);
        let goal = Goal::new("compile", "git checkout -b x");

        let result = CompilationResultMsg {
            branch_name: BranchName::new(),
            pre_commands_results: vec![],
            compilation_result: ActionOutput {
                action_name: "setup".into(),
                out: String::new(),
                exit_code: 0,
            },
        };
        handle_setup_compilation_output(&mut repo, &locator, result, &goal).unwrap();

        let slice = repo.locate_node(&locator).unwrap();
        assert_eq!(slice.node().state, NodeState::AwaitingInference);
        assert_eq!(slice.graph.state, CommitGraphState::InProgress);
    }

    #[test]
    fn setup_failure_marks_graph_goal_setup_failed() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::RunningGoalSetup);
        let locator = NodeLocator::new(root_branch, goal_id, root_id);
        let goal = Goal::new("compile", "git checkout -b x");

        let result = CompilationResultMsg {
            branch_name: BranchName::new(),
            pre_commands_results: vec![],
            compilation_result: ActionOutput {
                action_name: "setup".into(),
                out: String::new(),
                exit_code: 1,
            },
        };
        handle_setup_compilation_output(&mut repo, &locator, result, &goal).unwrap();

        let graph_locator = CommitGraphLocator::new(locator.branch_name.clone(), locator.goal_id.clone());
        let slice = repo.locate_graph(&graph_locator).unwrap();
        assert_eq!(slice.graph.state, CommitGraphState::GoalSetupFailed);
    }

    #[test]
    fn successful_git_commit_produces_a_new_branch_target_and_cg_result() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::RunningCompilation);
        let node_branch = BranchName::new();
        {
            let mut slice = repo
                .locate_node(&NodeLocator::new(
                    root_branch.clone(),
                    goal_id.clone(),
                    root_id.clone(),
                ))
                .unwrap();
            slice.node_mut().branch_name = Some(node_branch.clone());
        }
        let locator = NodeLocator::new(root_branch, goal_id, root_id);

        let result = CompilationResultMsg {
            branch_name: node_branch.clone(),
            pre_commands_results: vec![ActionOutput {
                action_name: "git-commit".into(),
                out: "DIFF-A".into(),
                exit_code: 0,
            }],
            compilation_result: ActionOutput {
                action_name: "compile".into(),
                out: String::new(),
                exit_code: 0,
            },
        };
        handle_compilation_output(&mut repo, &locator, result, 10).unwrap();

        assert!(repo.branch_targets.contains_key(&node_branch));
        let graph_locator = CommitGraphLocator::new(locator.branch_name.clone(), locator.goal_id.clone());
        let slice = repo.locate_graph(&graph_locator).unwrap();
        assert_eq!(slice.graph.results.len(), 1);
        assert_eq!(slice.graph.results[0].diff_patch, "DIFF-A");
        assert_eq!(slice.graph.state, CommitGraphState::Success);
    }

    #[test]
    fn depth_exhaustion_when_no_commit_and_depth_reached() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::RunningCompilation);
        let locator = NodeLocator::new(root_branch, goal_id, root_id);

        let result = CompilationResultMsg {
            branch_name: BranchName::new(),
            pre_commands_results: vec![],
            compilation_result: ActionOutput {
                action_name: "compile".into(),
                out: String::new(),
                exit_code: 0,
            },
        };
        handle_compilation_output(&mut repo, &locator, result, 0).unwrap();

        let slice = repo.locate_node(&locator).unwrap();
        assert_eq!(slice.node().result, NodeResult::DepthExhaustionFailure);
    }

    #[test]
    fn termination_cascades_to_descendants_and_sets_the_flag() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::AwaitingInference);

        let child_id = {
            let mut slice = repo
                .locate_node(&NodeLocator::new(root_branch.clone(), goal_id.clone(), root_id.clone()))
                .unwrap();
            add_node_to_commit_graph(slice.graph, &root_id, "<thought>\nhi\n</thought>\n<git-status/>\n")
        };

        let locator = NodeLocator::new(root_branch, goal_id, child_id.clone());
        request_node_termination_recursively(&mut repo, &locator).unwrap();

        let slice = repo.locate_node(&locator).unwrap();
        assert!(slice.node().termination_requested);
        assert_eq!(slice.node().result, NodeResult::Terminated);
    }

    #[test]
    fn stray_result_for_a_terminated_node_is_absorbed_not_errored() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let (goal_id, root_id) =
            setup_graph_with_root_at(&mut repo, &root_branch, NodeState::RunningCompilation);
        let locator = NodeLocator::new(root_branch, goal_id, root_id);
        request_node_termination_recursively(&mut repo, &locator).unwrap();

        let result = CompilationResultMsg {
            branch_name: BranchName::new(),
            pre_commands_results: vec![],
            compilation_result: ActionOutput {
                action_name: "compile".into(),
                out: String::new(),
                exit_code: 0,
            },
        };
        assert!(handle_compilation_output(&mut repo, &locator, result, 10).is_ok());
    }
}
