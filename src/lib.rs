//! forge-orchestrator is the coordinator for a branch-exploration reinforcement-learning
//! loop: a language model iteratively edits a source repository to satisfy compilation
//! goals, and this crate tracks the resulting tree of repository branch states, dispatches
//! inference and compilation work to remote workers over durable queues, and assembles
//! GRPO-style training data from completed explorations.
//!
//! # Subsystems
//!
//! - [`engine`] — a reliable task dispatcher over a shared key-value queue broker, with
//!   per-task visibility tracking, redelivery on timeout, and backpressure.
//! - [`graph`] — the repo/commit graph data model: branch targets, per-goal exploration
//!   subgraphs, nodes, their state machines, and weighted frontier selection.
//! - [`orchestrator`] — binds goals to graph nodes, produces prompts and compilation
//!   tasks, consumes results, and mediates training-data advertisement.
//! - [`training`] — GRPO-style advantage extraction and the advertisement store consumed
//!   by trainer processes.
//!
//! # Out of scope
//!
//! Command-line parsing, configuration loading, experiment directory conventions, cloud
//! VM provisioning, worker bootstrap, and the inference/training workers themselves are
//! external collaborators and are not implemented here.

pub mod actions;
pub mod broker;
pub mod compilation;
pub mod config;
pub mod engine;
pub mod errors;
pub mod golden;
pub mod goal;
pub mod graph;
pub mod http;
pub mod ids;
pub mod orchestrator;
pub mod prompt;
pub mod training;

#[cfg(test)]
pub(crate) mod test_support {
    use tracing_subscriber::util::SubscriberInitExt;

    /// Route a test's `tracing` events to stdout. Safe to call from multiple tests in
    /// parallel — `try_init` silently no-ops past the first successful call.
    pub(crate) fn init_logger() {
        let _ = tracing_subscriber::fmt::Subscriber::builder()
            .with_target(false)
            .without_time()
            .with_level(true)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
            .try_init();
    }
}
