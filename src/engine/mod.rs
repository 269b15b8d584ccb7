//! The work-distribution engine (§4.1): a broker-backed task/processing/results triad
//! fronted by four cooperating pumps, named after the original implementation's
//! camshaft/crankshaft/timing-belt/OBD metaphor.
//!
//! ```text
//!           Input()                                         Output()
//!              |                                                ^
//!              v                                                |
//!   +-------------------+   J:tasks   +------------+  J:results +-------------+
//!   |   task pump        | ---------> | (worker)   | ---------> | results pump |
//!   | (redelivery,       |            +------------+            | (stats,     |
//!   |  backpressure,     |                  ^                    |  delivery)  |
//!   |  refill)           |   J:processing   |                    +-------------+
//!   +-------------------+ <----------------+
//!                         processing pump (claims + bookkeeping)
//! ```
//!
//! The queued-task bookkeeping (`queued_tasks`) is the engine's only shared mutable
//! state; every pump takes its lock for the shortest span it can manage and never holds
//! it across a broker call.

pub mod messages;
pub mod stats;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, JobQueueNames};
use crate::config::SchedulingParams;
use crate::errors::{OrchestratorError, Result};
use crate::ids::EngineTaskId;

pub use messages::{EngineTaskMsg, EngineTaskProcessingMsg, EngineTaskResultMsg, QueuedTask};
pub use stats::{EngineStatEvent, StatsRing};

/// The four job-names the orchestrator drives distinct engines for (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineJobName {
    Inference,
    Compilation,
    GoalCompilation,
    Test,
}

impl EngineJobName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineJobName::Inference => "inference-engine",
            EngineJobName::Compilation => "compilation-engine",
            EngineJobName::GoalCompilation => "goal-compilation-engine",
            EngineJobName::Test => "test-engine",
        }
    }
}

impl std::fmt::Display for EngineJobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type QueuedTaskMap = Arc<TokioMutex<HashMap<EngineTaskId, QueuedTask>>>;

/// A running work-distribution engine for one job-name.
///
/// `Engine::start` spawns the four pumps and returns immediately; callers drive work
/// through [`Engine::input`] and drain completions through [`Engine::output`].
pub struct Engine {
    job: EngineJobName,
    input_tx: mpsc::Sender<EngineTaskMsg>,
    output_rx: TokioMutex<mpsc::Receiver<EngineTaskResultMsg>>,
    output_pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    fatal: Arc<TokioMutex<Option<OrchestratorError>>>,
    handles: TokioMutex<Vec<JoinHandle<()>>>,
    pub stats: Arc<StatsRing>,
}

impl Engine {
    /// Clear `J:tasks`/`J:processing`/`J:results` and spawn the four pumps.
    ///
    /// Clearing all three queues on startup (mirroring the original `dropQueuesForStartup`)
    /// means a restart never resumes claims a previous process made promises about; every
    /// task in flight at the time of a restart is simply lost and must be re-submitted by
    /// whoever owns that level of the system (the orchestrator, replaying from its own
    /// graph state).
    pub async fn start(
        job: EngineJobName,
        broker: Arc<dyn Broker>,
        scheduling: SchedulingParams,
    ) -> Result<Self> {
        let names = JobQueueNames::for_job(job.as_str());
        broker.delete(&names.tasks).await?;
        broker.delete(&names.processing).await?;
        broker.delete(&names.results).await?;

        let (input_tx, input_rx) = mpsc::channel(scheduling.input_chan_size);
        let (output_tx, output_rx) = mpsc::channel(scheduling.output_chan_size);

        let queued_tasks: QueuedTaskMap = Arc::new(TokioMutex::new(HashMap::new()));
        let stats = Arc::new(StatsRing::new(256));
        let shutdown = CancellationToken::new();
        let fatal: Arc<TokioMutex<Option<OrchestratorError>>> = Arc::new(TokioMutex::new(None));
        let output_pending = Arc::new(AtomicUsize::new(0));

        let task_pump_handle = tokio::spawn(task_pump(
            job,
            broker.clone(),
            names.tasks.clone(),
            queued_tasks.clone(),
            stats.clone(),
            scheduling.clone(),
            input_rx,
            output_pending.clone(),
            shutdown.clone(),
            fatal.clone(),
        ));

        let processing_pump_handle = tokio::spawn(processing_pump(
            job,
            broker.clone(),
            names.processing.clone(),
            queued_tasks.clone(),
            scheduling.clone(),
            shutdown.clone(),
            fatal.clone(),
        ));

        let results_pump_handle = tokio::spawn(results_pump(
            job,
            broker.clone(),
            names.results.clone(),
            queued_tasks.clone(),
            stats.clone(),
            scheduling.clone(),
            output_tx,
            output_pending.clone(),
            shutdown.clone(),
            fatal.clone(),
        ));

        let stats_pump_handle = tokio::spawn(stats_pump(
            job,
            stats.clone(),
            scheduling.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            job,
            input_tx,
            output_rx: TokioMutex::new(output_rx),
            output_pending,
            shutdown,
            fatal,
            handles: TokioMutex::new(vec![
                task_pump_handle,
                processing_pump_handle,
                results_pump_handle,
                stats_pump_handle,
            ]),
            stats,
        })
    }

    pub fn job(&self) -> EngineJobName {
        self.job
    }

    /// Submit one task. `id` is generated if not supplied; the caller should keep a
    /// record of whichever id is ultimately used if it needs to correlate a later result.
    pub async fn input(&self, task: String, id: Option<EngineTaskId>) -> Result<EngineTaskId> {
        let id = id.unwrap_or_else(EngineTaskId::new);
        let msg = EngineTaskMsg {
            id: id.clone(),
            task,
        };
        self.input_tx
            .send(msg)
            .await
            .map_err(|_| OrchestratorError::Custom("engine input channel closed".into()))?;
        Ok(id)
    }

    /// Receive the next completed result, or `None` once the engine has fully stopped
    /// and drained.
    pub async fn output(&self) -> Option<EngineTaskResultMsg> {
        let mut rx = self.output_rx.lock().await;
        let got = rx.recv().await;
        if got.is_some() {
            self.output_pending.fetch_sub(1, Ordering::SeqCst);
        }
        got
    }

    /// Ask all four pumps to stop at their next opportunity. Returns immediately;
    /// callers that need to know the pumps have actually exited should follow with
    /// [`Engine::wait_for_stop`].
    pub fn trigger_stop(&self) {
        self.shutdown.cancel();
    }

    /// Block until every pump has exited.
    pub async fn wait_for_stop(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!(job = %self.job, error = %e, "engine pump task panicked");
            }
        }
    }

    /// Take the fatal error that caused a pump to stop itself, if any. Once taken, a
    /// second call returns `None` even if the condition recurs without being re-armed.
    pub async fn take_fatal(&self) -> Option<OrchestratorError> {
        self.fatal.lock().await.take()
    }

    pub async fn report(&self) -> String {
        self.stats.report(self.job.as_str()).await
    }
}

async fn mark_fatal(
    fatal: &Arc<TokioMutex<Option<OrchestratorError>>>,
    shutdown: &CancellationToken,
    err: OrchestratorError,
) {
    error!(error = %err, "engine pump hit a fatal condition, stopping engine");
    *fatal.lock().await = Some(err);
    shutdown.cancel();
}

/// Camshaft: redelivers timed-out tasks, applies backpressure, and refills `J:tasks`
/// from the bounded input channel.
#[allow(clippy::too_many_arguments)]
async fn task_pump(
    job: EngineJobName,
    broker: Arc<dyn Broker>,
    tasks_key: String,
    queued_tasks: QueuedTaskMap,
    stats: Arc<StatsRing>,
    scheduling: SchedulingParams,
    mut input_rx: mpsc::Receiver<EngineTaskMsg>,
    output_pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    fatal: Arc<TokioMutex<Option<OrchestratorError>>>,
) {
    let mut ticker = tokio::time::interval(scheduling.cam_shaft_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = redeliver_timed_out(&broker, &tasks_key, &queued_tasks, &stats, &scheduling).await {
            mark_fatal(&fatal, &shutdown, e).await;
            break;
        }

        let current_len = match broker.len(&tasks_key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(job = %job, error = %e, "failed to read task queue length, skipping refill this tick");
                continue;
            }
        };

        if current_len > scheduling.min_task_queue_size {
            continue;
        }
        if scheduling.backpressure_enabled && output_pending.load(Ordering::SeqCst) > 0 {
            stats.record(EngineStatEvent::BackPressureApplied).await;
            continue;
        }

        let room = scheduling.max_task_queue_size.saturating_sub(current_len);
        for _ in 0..room {
            let msg = match input_rx.try_recv() {
                Ok(msg) => msg,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!(job = %job, "engine input channel closed, task pump will stop refilling");
                    break;
                }
            };

            let raw = match serde_json::to_string(&msg) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(job = %job, error = %e, "failed to serialize task, dropping");
                    continue;
                }
            };
            if let Err(e) = broker.push_head(&tasks_key, raw).await {
                mark_fatal(&fatal, &shutdown, e).await;
                return;
            }
            queued_tasks
                .lock()
                .await
                .insert(msg.id.clone(), QueuedTask::new(msg, Utc::now()));
            stats.record(EngineStatEvent::TaskDispatched).await;
        }
    }
}

async fn redeliver_timed_out(
    broker: &Arc<dyn Broker>,
    tasks_key: &str,
    queued_tasks: &QueuedTaskMap,
    stats: &Arc<StatsRing>,
    scheduling: &SchedulingParams,
) -> Result<()> {
    let now = Utc::now();
    let timed_out: Vec<(EngineTaskId, EngineTaskMsg)> = {
        let guard = queued_tasks.lock().await;
        guard
            .iter()
            .filter_map(|(id, queued)| match queued.processing_start_time {
                Some(started)
                    if now.signed_duration_since(started).to_std().unwrap_or_default()
                        > scheduling.task_processing_timeout =>
                {
                    Some((id.clone(), queued.msg.clone()))
                }
                _ => None,
            })
            .collect()
    };

    for (id, msg) in timed_out {
        let raw = serde_json::to_string(&msg)?;
        broker.push_head(tasks_key, raw).await?;
        let mut guard = queued_tasks.lock().await;
        if let Some(queued) = guard.get_mut(&id) {
            queued.processing_start_time = None;
        }
        drop(guard);
        stats.record(EngineStatEvent::TaskRequeued).await;
    }
    Ok(())
}

/// Crankshaft: drains `J:processing`, marking each claimed task's processing-start time.
/// A processing-queue entry that fails to parse indicates the worker and the engine have
/// drifted on wire format, which is unrecoverable without a restart, so this pump treats
/// it as fatal.
async fn processing_pump(
    job: EngineJobName,
    broker: Arc<dyn Broker>,
    processing_key: String,
    queued_tasks: QueuedTaskMap,
    scheduling: SchedulingParams,
    shutdown: CancellationToken,
    fatal: Arc<TokioMutex<Option<OrchestratorError>>>,
) {
    let mut ticker = tokio::time::interval(scheduling.timing_belt_interval);
    const MAX_BATCH: usize = 1000;
    const POP_BOUND: std::time::Duration = std::time::Duration::from_millis(50);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pump_start = Utc::now();
        for _ in 0..MAX_BATCH {
            let raw = match broker.pop_tail_blocking(&processing_key, POP_BOUND).await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    warn!(job = %job, error = %e, "broker transport error draining processing queue, retrying next tick");
                    break;
                }
            };

            let msg: EngineTaskProcessingMsg = match serde_json::from_str(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    mark_fatal(
                        &fatal,
                        &shutdown,
                        OrchestratorError::UnparseableMessage(format!(
                            "processing queue entry `{raw}`: {e}"
                        )),
                    )
                    .await;
                    return;
                }
            };

            let mut guard = queued_tasks.lock().await;
            match guard.get_mut(&msg.id) {
                Some(queued) => queued.processing_start_time = Some(pump_start),
                None => {
                    warn!(job = %job, task_id = %msg.id, "processing claim for a task the engine has no record of, ignoring");
                }
            }
        }
    }
}

/// Timing belt: drains `J:results`, matches each result back to its queued task, records
/// the observed processing duration, and forwards it to the bounded output channel.
#[allow(clippy::too_many_arguments)]
async fn results_pump(
    job: EngineJobName,
    broker: Arc<dyn Broker>,
    results_key: String,
    queued_tasks: QueuedTaskMap,
    stats: Arc<StatsRing>,
    scheduling: SchedulingParams,
    output_tx: mpsc::Sender<EngineTaskResultMsg>,
    output_pending: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    fatal: Arc<TokioMutex<Option<OrchestratorError>>>,
) {
    let mut ticker = tokio::time::interval(scheduling.crank_shaft_interval);
    const MAX_BATCH: usize = 1000;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let pump_start = Utc::now();
        for _ in 0..MAX_BATCH {
            let raw = match broker.pop_tail(&results_key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) => {
                    mark_fatal(&fatal, &shutdown, e).await;
                    return;
                }
            };

            let msg: EngineTaskResultMsg = match serde_json::from_str(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(job = %job, error = %e, raw = %raw, "discarding unparseable result");
                    continue;
                }
            };

            let queued = queued_tasks.lock().await.remove(&msg.id);
            let Some(queued) = queued else {
                warn!(job = %job, task_id = %msg.id, "discarding result for an unrecognized task id");
                stats.record(EngineStatEvent::UnknownResultDiscarded).await;
                continue;
            };

            let processing_duration = queued
                .processing_start_time
                .map(|started| {
                    pump_start
                        .signed_duration_since(started)
                        .to_std()
                        .unwrap_or_default()
                })
                .unwrap_or_default();
            stats
                .record(EngineStatEvent::ResultDelivered {
                    processing_duration,
                })
                .await;

            if output_tx.send(msg).await.is_err() {
                debug!(job = %job, "output channel closed, dropping remaining results");
                return;
            }
            output_pending.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// OBD: periodically logs a stats report. Purely observational; never fatal.
async fn stats_pump(
    job: EngineJobName,
    stats: Arc<StatsRing>,
    scheduling: SchedulingParams,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(scheduling.odb_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        info!("{}", stats.report(job.as_str()).await);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::memory_broker::MemoryBroker;

    fn fast_scheduling() -> SchedulingParams {
        SchedulingParams {
            min_task_queue_size: 0,
            max_task_queue_size: 16,
            task_processing_timeout: Duration::from_millis(100),
            cam_shaft_interval: Duration::from_millis(10),
            crank_shaft_interval: Duration::from_millis(10),
            timing_belt_interval: Duration::from_millis(10),
            odb_interval: Duration::from_secs(60),
            input_chan_size: 16,
            output_chan_size: 16,
            backpressure_enabled: true,
        }
    }

    #[tokio::test]
    async fn a_task_pushed_through_a_worker_comes_back_out_the_output_side() {
        crate::test_support::init_logger();
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let engine = Engine::start(EngineJobName::Test, broker.clone(), fast_scheduling())
            .await
            .unwrap();

        let id = engine.input("do the thing".into(), None).await.unwrap();

        let names = JobQueueNames::for_job(EngineJobName::Test.as_str());
        // Act as the worker: claim the task, then report its result.
        let raw = loop {
            if let Some(raw) = broker.pop_tail(&names.tasks).await.unwrap() {
                break raw;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let claimed: EngineTaskMsg = serde_json::from_str(&raw).unwrap();
        assert_eq!(claimed.id, id);
        broker
            .push_head(&names.processing, raw.clone())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        broker
            .push_head(
                &names.results,
                serde_json::to_string(&EngineTaskResultMsg {
                    id: id.clone(),
                    result: "done".into(),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), engine.output())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.id, id);
        assert_eq!(result.result, "done");

        engine.trigger_stop();
        engine.wait_for_stop().await;
    }

    #[tokio::test]
    async fn a_task_stuck_on_processing_past_its_timeout_is_redelivered() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let engine = Engine::start(EngineJobName::Test, broker.clone(), fast_scheduling())
            .await
            .unwrap();

        let id = engine.input("slow task".into(), None).await.unwrap();
        let names = JobQueueNames::for_job(EngineJobName::Test.as_str());

        let raw = loop {
            if let Some(raw) = broker.pop_tail(&names.tasks).await.unwrap() {
                break raw;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        // Claim it, then abandon it — never report a result.
        broker.push_head(&names.processing, raw).await.unwrap();

        // After the timeout elapses the task pump should push it back onto `tasks`.
        let redelivered = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(raw) = broker.pop_tail(&names.tasks).await.unwrap() {
                    return raw;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let redelivered: EngineTaskMsg = serde_json::from_str(&redelivered).unwrap();
        assert_eq!(redelivered.id, id);

        engine.trigger_stop();
        engine.wait_for_stop().await;
    }

    #[tokio::test]
    async fn an_unparseable_processing_entry_is_fatal() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let engine = Engine::start(EngineJobName::Test, broker.clone(), fast_scheduling())
            .await
            .unwrap();
        let names = JobQueueNames::for_job(EngineJobName::Test.as_str());

        broker
            .push_head(&names.processing, "not json".into())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.wait_for_stop().await;
        let fatal = engine.take_fatal().await;
        assert!(matches!(
            fatal,
            Some(OrchestratorError::UnparseableMessage(_))
        ));
    }
}
