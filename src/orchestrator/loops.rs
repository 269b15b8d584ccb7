//! The seven coordination loops of §4.3 (plus the two training loops), each an
//! independent cooperative task suspending only on its ticker, the relevant engine's
//! channels, or the shutdown token — never holding `G` across a broker call.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tracing::{info, warn};

use crate::broker::training_keys;
use crate::compilation::{
    CompilationTaskMsg, InferenceResultMsg, PreCommand, actions_to_pre_commands,
};
use crate::errors::{OrchestratorError, Result};
use crate::goal::Goal;
use crate::graph::model::{CommitGraphState, NodeState};
use crate::graph::{CommitGraphLocator, NodeLocator};
use crate::ids::TrainingGroupId;
use crate::prompt::build_inference_task_for_node;
use crate::training::extract_training_groups;

use super::Orchestrator;

/// Build the compilation task for an ordinary (non-setup) node: the pre-commands are
/// the node's own parsed actions, diffed against the owning branch target's parent
/// (or, for a root branch target with no parent, against its own branch — there is
/// nothing else to diff against). The compilation script is the owning goal's
/// `branch_setup_script`, reused as the repo's build/validate harness for every
/// attempt, not just the first.
fn build_compilation_task(
    repo: &mut crate::graph::RepoGraph,
    locator: &NodeLocator,
    goal: &Goal,
) -> Result<CompilationTaskMsg> {
    let slice = repo.locate_node(locator)?;
    let node = slice.node();
    let actions = &node
        .inference_output
        .as_ref()
        .ok_or_else(|| OrchestratorError::InvalidTransition("node has no inference output to compile".into()))?
        .actions;
    let diff_base = slice
        .parent_branch_name
        .clone()
        .unwrap_or_else(|| slice.branch_name.clone());
    let pre_commands: Vec<PreCommand> = actions_to_pre_commands(actions, &diff_base);
    let new_branch_name = node
        .branch_name
        .clone()
        .ok_or_else(|| OrchestratorError::InvalidTransition("node has no branch_name assigned".into()))?;
    Ok(CompilationTaskMsg {
        branch_name: slice.branch_name.clone(),
        new_branch_name,
        pre_commands,
        compilation_script: goal.branch_setup_script.clone(),
    })
}

/// 1. Goal-Compilation TX: every `goal_compilation_tick`, fill the gap between
/// `max_simultaneous_graphs` and the current unfinished-graph count by picking a goal,
/// weighted-sampling a branch target for it, and instantiating a fresh `CommitGraph`.
pub(super) async fn goal_compilation_tx(orch: Arc<Orchestrator>) {
    let mut ticker = interval(orch.config.goal_compilation_tick);
    loop {
        tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut dispatches = Vec::new();
        {
            let mut repo = orch.repo.lock().await;
            let room = orch
                .config
                .max_simultaneous_graphs
                .saturating_sub(repo.unfinished_graph_count());
            let attempts = room.min(orch.config.max_dispatch_attempts_per_tick);
            for _ in 0..attempts {
                let Some(goal) = orch.goal_provider.get_next() else {
                    break;
                };
                let Some(branch_name) = crate::graph::weighting::select_branch_target_for_goal(
                    &repo,
                    &goal.id,
                    &orch.weighting,
                ) else {
                    break;
                };

                let mut graph = crate::graph::model::CommitGraph::new(goal.id.clone());
                let root_id = graph.root_node.clone();
                graph.nodes.get_mut(&root_id).unwrap().state = NodeState::RunningGoalSetup;
                let branch_target = repo.branch_targets.get_mut(&branch_name).unwrap();
                branch_target.subgraphs.insert(goal.id.clone(), graph);

                let locator = NodeLocator::new(branch_name.clone(), goal.id.clone(), root_id);
                let task = CompilationTaskMsg {
                    branch_name: branch_name.clone(),
                    new_branch_name: crate::ids::BranchName::new(),
                    pre_commands: vec![],
                    compilation_script: goal.branch_setup_script.clone(),
                };
                dispatches.push((task, locator, goal));
            }
        }

        for (task, locator, goal) in dispatches {
            let payload = match serde_json::to_string(&task) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to serialise goal setup task");
                    continue;
                }
            };
            match orch.goal_compilation_engine.input(payload, None).await {
                Ok(task_id) => {
                    orch.goal_compilation_locators.lock().await.insert(task_id, locator);
                    orch.goals.lock().await.insert(goal.id.clone(), goal);
                }
                Err(e) => warn!(error = %e, "failed to enqueue goal setup task"),
            }
        }
    }
}

/// 2. Goal-Compilation RX: apply each setup result through `HandleSetupCompilationOutput`.
pub(super) async fn goal_compilation_rx(orch: Arc<Orchestrator>) {
    loop {
        let result = tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            r = orch.goal_compilation_engine.output() => r,
        };
        let Some(msg) = result else { return };

        let locator = orch.goal_compilation_locators.lock().await.remove(&msg.id);
        let Some(locator) = locator else {
            orch.mark_fatal(OrchestratorError::UnknownTaskId(msg.id.to_string())).await;
            continue;
        };
        let setup_result = match serde_json::from_str(&msg.result) {
            Ok(r) => r,
            Err(e) => {
                orch.mark_fatal(OrchestratorError::UnparseableMessage(e.to_string())).await;
                continue;
            }
        };
        let goal = orch.goals.lock().await.get(&locator.goal_id).cloned();
        let Some(goal) = goal else {
            warn!(goal_id = %locator.goal_id, "setup result for a goal no longer tracked");
            continue;
        };

        let mut repo = orch.repo.lock().await;
        if let Err(e) =
            crate::graph::handle_setup_compilation_output(&mut repo, &locator, setup_result, &goal)
        {
            warn!(error = %e, "HandleSetupCompilationOutput failed");
        }
    }
}

/// 3. Inference TX: enumerate every `AwaitingInference` node across unfinished graphs,
/// build its prompt, flip it to `RunningInference`, and enqueue.
pub(super) async fn inference_tx(orch: Arc<Orchestrator>) {
    loop {
        if orch.shutdown.is_cancelled() {
            return;
        }
        let dispatched = inference_tx_tick(&orch).await;
        if dispatched == 0 {
            tokio::select! {
                _ = orch.shutdown.cancelled() => return,
                _ = sleep(orch.config.idle_tick) => {}
            }
        }
    }
}

async fn inference_tx_tick(orch: &Arc<Orchestrator>) -> usize {
    let mut dispatches = Vec::new();
    {
        let mut repo = orch.repo.lock().await;
        let goals = orch.goals.lock().await.clone();
        let mut candidates = Vec::new();
        for branch_target in repo.branch_targets.values() {
            for graph in branch_target.subgraphs.values() {
                if !graph.is_unfinished() {
                    continue;
                }
                for node in graph.nodes.values() {
                    if node.state == NodeState::AwaitingInference {
                        candidates.push(NodeLocator::new(
                            branch_target.branch_name.clone(),
                            graph.goal_id.clone(),
                            node.id.clone(),
                        ));
                    }
                }
            }
        }
        candidates.truncate(orch.config.max_dispatch_attempts_per_tick);

        for locator in candidates {
            let Some(goal) = goals.get(&locator.goal_id) else {
                continue;
            };
            let task = match build_inference_task_for_node(&mut repo, &locator, goal) {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, node = %locator.node_id, "failed to build inference prompt");
                    continue;
                }
            };
            if let Ok(mut slice) = repo.locate_node(&locator) {
                slice.node_mut().state = NodeState::RunningInference;
            }
            dispatches.push((task, locator));
        }
    }

    let count = dispatches.len();
    for (task, locator) in dispatches {
        let payload = match serde_json::to_string(&task) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialise inference task");
                continue;
            }
        };
        match orch.inference_engine.input(payload, None).await {
            Ok(task_id) => {
                orch.inference_locators.lock().await.insert(task_id, locator);
            }
            Err(e) => warn!(error = %e, "failed to enqueue inference task"),
        }
    }
    count
}

/// 4. Inference RX: apply each inference result through `HandleInferenceOutput`.
pub(super) async fn inference_rx(orch: Arc<Orchestrator>) {
    loop {
        let result = tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            r = orch.inference_engine.output() => r,
        };
        let Some(msg) = result else { return };

        let locator = orch.inference_locators.lock().await.remove(&msg.id);
        let Some(locator) = locator else {
            orch.mark_fatal(OrchestratorError::UnknownTaskId(msg.id.to_string())).await;
            continue;
        };
        let inference_result: InferenceResultMsg = match serde_json::from_str(&msg.result) {
            Ok(r) => r,
            Err(e) => {
                orch.mark_fatal(OrchestratorError::UnparseableMessage(e.to_string())).await;
                continue;
            }
        };

        let mut repo = orch.repo.lock().await;
        if let Err(e) = crate::graph::handle_inference_output(&mut repo, &locator, inference_result) {
            warn!(error = %e, "HandleInferenceOutput failed");
        }
    }
}

/// 5. Compilation TX: enumerate every `AwaitingCompilation` node, build its compilation
/// task, flip it to `RunningCompilation`, and enqueue.
pub(super) async fn compilation_tx(orch: Arc<Orchestrator>) {
    loop {
        if orch.shutdown.is_cancelled() {
            return;
        }
        let dispatched = compilation_tx_tick(&orch).await;
        if dispatched == 0 {
            tokio::select! {
                _ = orch.shutdown.cancelled() => return,
                _ = sleep(orch.config.idle_tick) => {}
            }
        }
    }
}

async fn compilation_tx_tick(orch: &Arc<Orchestrator>) -> usize {
    let mut dispatches = Vec::new();
    {
        let mut repo = orch.repo.lock().await;
        let goals = orch.goals.lock().await.clone();
        let mut candidates = Vec::new();
        for branch_target in repo.branch_targets.values() {
            for graph in branch_target.subgraphs.values() {
                if !graph.is_unfinished() {
                    continue;
                }
                for node in graph.nodes.values() {
                    if node.state == NodeState::AwaitingCompilation {
                        candidates.push(NodeLocator::new(
                            branch_target.branch_name.clone(),
                            graph.goal_id.clone(),
                            node.id.clone(),
                        ));
                    }
                }
            }
        }
        candidates.truncate(orch.config.max_dispatch_attempts_per_tick);

        for locator in candidates {
            let Some(goal) = goals.get(&locator.goal_id) else {
                continue;
            };
            let task = match build_compilation_task(&mut repo, &locator, goal) {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, node = %locator.node_id, "failed to build compilation task");
                    continue;
                }
            };
            if let Ok(mut slice) = repo.locate_node(&locator) {
                slice.node_mut().state = NodeState::RunningCompilation;
            }
            dispatches.push((task, locator));
        }
    }

    let count = dispatches.len();
    for (task, locator) in dispatches {
        let payload = match serde_json::to_string(&task) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialise compilation task");
                continue;
            }
        };
        match orch.compilation_engine.input(payload, None).await {
            Ok(task_id) => {
                orch.compilation_locators.lock().await.insert(task_id, locator);
            }
            Err(e) => warn!(error = %e, "failed to enqueue compilation task"),
        }
    }
    count
}

/// 6. Compilation RX: apply each compilation result through `HandleCompilationOutput`.
pub(super) async fn compilation_rx(orch: Arc<Orchestrator>) {
    loop {
        let result = tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            r = orch.compilation_engine.output() => r,
        };
        let Some(msg) = result else { return };

        let locator = orch.compilation_locators.lock().await.remove(&msg.id);
        let Some(locator) = locator else {
            orch.mark_fatal(OrchestratorError::UnknownTaskId(msg.id.to_string())).await;
            continue;
        };
        let compilation_result = match serde_json::from_str(&msg.result) {
            Ok(r) => r,
            Err(e) => {
                orch.mark_fatal(OrchestratorError::UnparseableMessage(e.to_string())).await;
                continue;
            }
        };

        let mut repo = orch.repo.lock().await;
        if let Err(e) = crate::graph::handle_compilation_output(
            &mut repo,
            &locator,
            compilation_result,
            orch.config.max_commit_graph_depth,
        ) {
            warn!(error = %e, "HandleCompilationOutput failed");
        }
    }
}

/// 7. Periodic save: snapshot the graph to stable storage every `snapshot_interval`.
pub(super) async fn periodic_save(orch: Arc<Orchestrator>) {
    let mut ticker = interval(orch.config.snapshot_interval);
    loop {
        tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) = orch.save_snapshot().await {
            warn!(error = %e, "periodic snapshot failed");
        } else {
            info!(path = %orch.snapshot_path.display(), "snapshot saved");
        }
    }
}

/// Training TX: replay every already-`Success` subgraph into advertisements at
/// startup, then consume the graph's advertisement channel for newly successful ones.
pub(super) async fn training_tx(
    orch: Arc<Orchestrator>,
    mut advertisements: mpsc::Receiver<CommitGraphLocator>,
) {
    let replay: Vec<CommitGraphLocator> = {
        let repo = orch.repo.lock().await;
        repo.branch_targets
            .values()
            .flat_map(|bt| {
                bt.subgraphs.values().filter_map(move |g| {
                    (g.state == CommitGraphState::Success)
                        .then(|| CommitGraphLocator::new(bt.branch_name.clone(), g.goal_id.clone()))
                })
            })
            .collect()
    };
    for locator in replay {
        advertise_training_groups(&orch, locator).await;
    }

    loop {
        let locator = tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            l = advertisements.recv() => l,
        };
        let Some(locator) = locator else { return };
        advertise_training_groups(&orch, locator).await;
    }
}

async fn advertise_training_groups(orch: &Arc<Orchestrator>, locator: CommitGraphLocator) {
    let goal = orch.goals.lock().await.get(&locator.goal_id).cloned();
    let Some(goal) = goal else {
        warn!(goal_id = %locator.goal_id, "no tracked goal for advertised subgraph");
        return;
    };

    let groups = {
        let mut repo = orch.repo.lock().await;
        let repo_id = repo.id.clone();
        extract_training_groups(&mut repo, &repo_id, &locator, &goal)
    };
    let groups = match groups {
        Ok(groups) => groups,
        Err(e) => {
            warn!(error = %e, "failed to extract training groups");
            return;
        }
    };

    for group in groups {
        orch.training_store.insert(group.clone());
        if let Err(e) = orch
            .broker
            .push_head(training_keys::ADVERTISEMENT_LIST, group.id.to_string())
            .await
        {
            warn!(error = %e, "failed to advertise training group id");
        }
    }
}

/// Training RX: serve `training:request-chan` out of the in-memory advertisement
/// store, logging and skipping unknown ids.
pub(super) async fn training_rx(orch: Arc<Orchestrator>) {
    loop {
        let popped = tokio::select! {
            _ = orch.shutdown.cancelled() => return,
            r = orch.broker.pop_tail_blocking(
                training_keys::REQUEST_CHAN,
                orch.config.broker_blocking_timeout,
            ) => r,
        };
        let raw_id = match popped {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "broker transport error polling training:request-chan");
                continue;
            }
        };
        let group_id: TrainingGroupId = match raw_id.parse() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, raw_id, "malformed training group id on request-chan");
                continue;
            }
        };
        let Some(group) = orch.training_store.get(&group_id) else {
            warn!(group_id = %group_id, "unknown training group id requested");
            continue;
        };
        let payload = match serde_json::to_string(&group) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to serialise training group payload");
                continue;
            }
        };
        if let Err(e) = orch.broker.push_head(training_keys::DATA_CHAN, payload).await {
            warn!(error = %e, "failed to push training group payload");
        }
    }
}
