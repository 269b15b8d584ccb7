//! The HTTP surface (§6): a read-mostly UI API over the repo/commit graph plus a
//! handful of operator mutators, all as JSON over `axum`.
//!
//! Every handler takes the same `Arc<Orchestrator>` state, locks `orchestrator.repo`
//! for the duration of one lookup or mutation, and never holds it across an `.await`
//! that isn't itself the lock acquisition — the same "no loop holds the graph mutex
//! across a broker call" discipline the coordination loops follow (§5), even though no
//! handler here talks to a broker directly.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::golden;
use crate::graph::model::{BranchTargetCounters, CommitGraph, CommitGraphNode, CommitGraphState, NodeMetadata};
use crate::graph::{self, CommitGraphLocator, NodeLocator};
use crate::ids::{BranchName, GoalId, NodeId};
use crate::orchestrator::Orchestrator;

/// Wraps [`OrchestratorError`] so it can be returned directly from an axum handler.
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::NotTerminal(_) | OrchestratorError::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            OrchestratorError::InvalidIdentifier(_, _) | OrchestratorError::ActionParseFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_branch(raw: &str) -> ApiResult<BranchName> {
    Ok(raw.parse()?)
}

fn parse_goal(raw: &str) -> ApiResult<GoalId> {
    Ok(raw.parse()?)
}

fn parse_node(raw: &str) -> ApiResult<NodeId> {
    Ok(raw.parse()?)
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/branch-targets", get(list_branch_targets))
        .route("/branch-targets/{branch}", get(get_branch_target))
        .route("/branch-targets/{branch}/stats", get(branch_target_stats))
        .route(
            "/branch-targets/{branch}/goals/{goal}",
            get(get_commit_graph),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/state",
            put(set_commit_graph_state),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/nodes/{node}",
            get(get_node).delete(delete_node),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/nodes/{node}/metadata",
            patch(set_node_metadata),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/nodes/{node}/children",
            post(create_child_node),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/nodes/{node}/terminate",
            post(terminate_node),
        )
        .route(
            "/branch-targets/{branch}/goals/{goal}/nodes/{node}/golden",
            post(save_golden_sample),
        )
        .route("/golden-samples", get(list_golden_samples))
        .with_state(orchestrator)
}

#[derive(Serialize)]
struct BranchTargetSummary {
    branch_name: BranchName,
    parent_branch_name: Option<BranchName>,
    goal_ids: Vec<GoalId>,
}

async fn list_branch_targets(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Json<Vec<BranchTargetSummary>> {
    let repo = orchestrator.repo.lock().await;
    let summaries = repo
        .branch_targets
        .values()
        .map(|bt| BranchTargetSummary {
            branch_name: bt.branch_name.clone(),
            parent_branch_name: bt.parent_branch_name.clone(),
            goal_ids: bt.subgraphs.keys().cloned().collect(),
        })
        .collect();
    Json(summaries)
}

async fn get_branch_target(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(branch): Path<String>,
) -> ApiResult<Json<crate::graph::model::BranchTarget>> {
    let branch_name = parse_branch(&branch)?;
    let repo = orchestrator.repo.lock().await;
    let branch_target = repo
        .branch_targets
        .get(&branch_name)
        .ok_or_else(|| OrchestratorError::NotFound(format!("branch target {branch_name}")))?;
    Ok(Json(branch_target.clone()))
}

async fn branch_target_stats(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(branch): Path<String>,
) -> ApiResult<Json<BranchTargetCounters>> {
    let branch_name = parse_branch(&branch)?;
    let repo = orchestrator.repo.lock().await;
    let branch_target = repo
        .branch_targets
        .get(&branch_name)
        .ok_or_else(|| OrchestratorError::NotFound(format!("branch target {branch_name}")))?;
    Ok(Json(branch_target.counters()))
}

async fn get_commit_graph(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal)): Path<(String, String)>,
) -> ApiResult<Json<CommitGraph>> {
    let locator = CommitGraphLocator::new(parse_branch(&branch)?, parse_goal(&goal)?);
    let mut repo = orchestrator.repo.lock().await;
    let slice = repo.locate_graph(&locator)?;
    Ok(Json(slice.graph.clone()))
}

#[derive(Deserialize)]
struct SetCommitGraphStateRequest {
    state: CommitGraphState,
}

async fn set_commit_graph_state(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal)): Path<(String, String)>,
    Json(body): Json<SetCommitGraphStateRequest>,
) -> ApiResult<StatusCode> {
    let locator = CommitGraphLocator::new(parse_branch(&branch)?, parse_goal(&goal)?);
    let mut repo = orchestrator.repo.lock().await;
    graph::set_commit_graph_state(&mut repo, &locator, body.state)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
) -> ApiResult<Json<CommitGraphNode>> {
    let locator = NodeLocator::new(parse_branch(&branch)?, parse_goal(&goal)?, parse_node(&node)?);
    let mut repo = orchestrator.repo.lock().await;
    let mut slice = repo.locate_node(&locator)?;
    Ok(Json(slice.node_mut().clone()))
}

async fn delete_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let locator = NodeLocator::new(parse_branch(&branch)?, parse_goal(&goal)?, parse_node(&node)?);
    let mut repo = orchestrator.repo.lock().await;
    graph::delete_terminal_node(&mut repo, &locator)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SetNodeMetadataRequest {
    favourite: Option<bool>,
    golden_sample: Option<bool>,
    label: Option<Option<String>>,
}

async fn set_node_metadata(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
    Json(body): Json<SetNodeMetadataRequest>,
) -> ApiResult<Json<NodeMetadata>> {
    let locator = NodeLocator::new(parse_branch(&branch)?, parse_goal(&goal)?, parse_node(&node)?);
    let mut repo = orchestrator.repo.lock().await;
    let mut slice = repo.locate_node(&locator)?;
    let metadata = &mut slice.node_mut().metadata;
    if let Some(favourite) = body.favourite {
        metadata.favourite = favourite;
    }
    if let Some(golden_sample) = body.golden_sample {
        metadata.golden_sample = golden_sample;
    }
    if let Some(label) = body.label {
        metadata.label = label;
    }
    Ok(Json(metadata.clone()))
}

#[derive(Deserialize)]
struct CreateChildNodeRequest {
    diff_patch: String,
}

#[derive(Serialize)]
struct CreateChildNodeResponse {
    node_id: NodeId,
}

async fn create_child_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
    Json(body): Json<CreateChildNodeRequest>,
) -> ApiResult<Json<CreateChildNodeResponse>> {
    let locator = NodeLocator::new(parse_branch(&branch)?, parse_goal(&goal)?, parse_node(&node)?);
    let mut repo = orchestrator.repo.lock().await;
    let node_id = graph::create_manual_child_node(&mut repo, &locator, BranchName::new(), body.diff_patch)?;
    Ok(Json(CreateChildNodeResponse { node_id }))
}

async fn terminate_node(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let locator = NodeLocator::new(parse_branch(&branch)?, parse_goal(&goal)?, parse_node(&node)?);
    let mut repo = orchestrator.repo.lock().await;
    graph::request_node_termination_recursively(&mut repo, &locator)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_golden_sample(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path((branch, goal, node)): Path<(String, String, String)>,
) -> ApiResult<Json<golden::GoldenSample>> {
    let goal_id = parse_goal(&goal)?;
    let locator = NodeLocator::new(parse_branch(&branch)?, goal_id.clone(), parse_node(&node)?);
    let goal = orchestrator
        .goal_for(&goal_id)
        .await
        .ok_or_else(|| OrchestratorError::NotFound(format!("goal {goal_id}")))?;
    let mut repo = orchestrator.repo.lock().await;
    let sample = golden::save_golden_sample(&mut repo, &locator, &goal)?;
    drop(repo);
    orchestrator.golden_store.insert(sample.clone());
    Ok(Json(sample))
}

async fn list_golden_samples(
    State(orchestrator): State<Arc<Orchestrator>>,
) -> Json<Vec<golden::GoldenSample>> {
    Json(orchestrator.golden_store.all())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_branch_rejects_malformed_ids() {
        assert!(parse_branch("not-a-branch").is_err());
    }

    #[test]
    fn parse_node_accepts_well_formed_ids() {
        let id = NodeId::new();
        assert_eq!(parse_node(id.as_str()).unwrap(), id);
    }
}
