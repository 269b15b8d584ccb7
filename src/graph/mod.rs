//! The repo/commit graph (§3, §4.2): data model, locators, state transitions, weighted
//! selection, and snapshot persistence.

pub mod locator;
pub mod model;
pub mod snapshot;
pub mod transitions;
pub mod weighting;

pub use locator::{BranchTargetLocator, CommitGraphLocator, NodeLocator};
pub use model::{
    BranchTarget, CGResult, CommitGraph, CommitGraphState, CommitGraphNode, NodeMetadata, NodeResult,
    NodeState, RepoGraph,
};
pub use transitions::{
    create_manual_child_node, delete_terminal_node, handle_compilation_output,
    handle_inference_output, handle_setup_compilation_output, request_node_termination_recursively,
    reset_transient_states, set_commit_graph_state,
};
