//! Error types for the orchestrator crate.
//!
//! This module defines a unified error enumeration used across the broker transport,
//! the work-distribution engine, the repo/commit graph state machine, and the HTTP
//! surface. It integrates with `thiserror` for `Display` and error-source chaining.
//!
//! Notes:
//! - Broker transport errors are expected to be retried by the caller; they are not
//!   inherently fatal, but the engine promotes a handful of shapes (unknown task id,
//!   unparseable processing message) to `Fatal` because they indicate loss of
//!   orchestrator authority over a task.
//! - State-machine misuse is only an error when the node is not `Done`/`Terminated`;
//!   callers are expected to special-case that before surfacing this variant.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the orchestrator crate.
pub enum OrchestratorError {
    /// The broker could not be reached or returned a transport-level failure.
    #[error("broker transport error: {0}")]
    BrokerTransport(String),

    /// A result arrived whose `task_id` has no matching entry in `queued_tasks`.
    #[error("unknown task id on result: {0}")]
    UnknownTaskId(String),

    /// A message popped off a processing queue failed to parse as JSON.
    #[error("unparseable processing message: {0}")]
    UnparseableMessage(String),

    /// An operation was attempted against a node/graph in a state that does not permit it.
    #[error("state machine misuse: {0}")]
    InvalidTransition(String),

    /// A typed identifier string was missing its required prefix or was otherwise malformed.
    #[error("invalid identifier `{0}`: expected prefix `{1}`")]
    InvalidIdentifier(String, &'static str),

    /// Goal setup validation rejected a compilation result.
    #[error("goal setup validation failed: {0}")]
    GoalSetupFailed(String),

    /// Model output failed to parse into a well-formed thought/action sequence.
    #[error("action parse/validate failed: {0}")]
    ActionParseFailed(String),

    /// A locator referred to a branch target, subgraph, or node that does not exist.
    #[error("locator not found: {0}")]
    NotFound(String),

    /// An admin mutation was rejected because the target node/graph was not terminal.
    #[error("admin mutation rejected: {0}")]
    NotTerminal(String),

    /// (De)serialization of a snapshot, wire message, or prompt failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying I/O error (snapshot persistence, etc).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    Custom(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
