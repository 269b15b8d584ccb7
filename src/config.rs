//! Scheduling and topology knobs for the engine and orchestrator.
//!
//! Loading these values from environment, CLI flags, or an experiment directory is an
//! external collaborator's responsibility; this module only defines the shapes and
//! their defaults, the way a single engine or orchestrator actually consumes them.

use std::time::Duration;

/// Tuning knobs for one [`crate::engine::Engine`] instance.
///
/// Field names echo the engine's internal pump nomenclature (camshaft/crankshaft/timing
/// belt/OBD) so that a stats report and this config can be read side by side.
#[derive(Debug, Clone)]
pub struct SchedulingParams {
    /// Below this many queued-but-unclaimed tasks, the task pump tops the queue back up.
    pub min_task_queue_size: usize,
    /// Ceiling on how many tasks the task pump will keep queued at once.
    pub max_task_queue_size: usize,
    /// How long a task may sit on `processing` before the task pump requeues it.
    pub task_processing_timeout: Duration,

    /// Tick interval for the task pump (redelivery + backpressure + refill).
    pub cam_shaft_interval: Duration,
    /// Tick interval for the results pump.
    pub crank_shaft_interval: Duration,
    /// Tick interval for the processing pump.
    pub timing_belt_interval: Duration,
    /// Tick interval for the stats pump.
    pub odb_interval: Duration,

    /// Capacity of the bounded producer-side input channel.
    pub input_chan_size: usize,
    /// Capacity of the bounded consumer-side output channel.
    pub output_chan_size: usize,

    /// When false, the task pump refills even while the output channel is non-empty.
    pub backpressure_enabled: bool,
}

impl Default for SchedulingParams {
    fn default() -> Self {
        Self {
            min_task_queue_size: 4,
            max_task_queue_size: 64,
            task_processing_timeout: Duration::from_secs(120),
            cam_shaft_interval: Duration::from_millis(500),
            crank_shaft_interval: Duration::from_millis(500),
            timing_belt_interval: Duration::from_millis(500),
            odb_interval: Duration::from_secs(30),
            input_chan_size: 256,
            output_chan_size: 256,
            backpressure_enabled: true,
        }
    }
}

/// Orchestrator-wide knobs shared by the seven coordination loops.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling on how many unfinished `CommitGraph`s may exist at once.
    pub max_simultaneous_graphs: usize,
    /// `CommitGraphNode.depth` at or beyond which a node is `Done/DepthExhaustionFailure`.
    pub max_commit_graph_depth: u32,
    /// Interval for the goal-compilation TX loop.
    pub goal_compilation_tick: Duration,
    /// Sleep applied to a TX loop when it finds nothing to enqueue.
    pub idle_tick: Duration,
    /// Interval for the periodic snapshot loop.
    pub snapshot_interval: Duration,
    /// Timeout used by blocking pops against broker-backed channels, so shutdown stays
    /// responsive even while a loop is waiting on the broker.
    pub broker_blocking_timeout: Duration,
    /// Upper bound on how many goals the goal-compilation TX loop will dispatch per tick.
    pub max_dispatch_attempts_per_tick: usize,
    /// Whether the training advertisement loops are enabled at all.
    pub training_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_graphs: 8,
            max_commit_graph_depth: 12,
            goal_compilation_tick: Duration::from_secs(6),
            idle_tick: Duration::from_secs(2),
            snapshot_interval: Duration::from_secs(60),
            broker_blocking_timeout: Duration::from_secs(5),
            max_dispatch_attempts_per_tick: 100,
            training_enabled: true,
        }
    }
}

/// Weighting constants used by [`crate::graph::weighting`].
#[derive(Debug, Clone, Copy)]
pub struct WeightingParams {
    /// Exponent applied to `(1 + alpha * (fail + succ))`; higher prefers newer targets.
    pub lambda: f64,
    /// Scales how much attempt count depresses weight.
    pub alpha: f64,
    /// Scales how much an in-progress subgraph discounts further exploration.
    pub beta: f64,
}

impl Default for WeightingParams {
    fn default() -> Self {
        Self {
            lambda: 0.6,
            alpha: 0.2,
            beta: 0.5,
        }
    }
}
