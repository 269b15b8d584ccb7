//! The orchestrator (§4.3): owns three work-distribution engines, the repo/commit
//! graph behind a single coarse mutex, the training advertisement store, and the
//! seven cooperative coordination loops that tie them together.

pub mod loops;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::config::{OrchestratorConfig, SchedulingParams, WeightingParams};
use crate::engine::{Engine, EngineJobName};
use crate::errors::{OrchestratorError, Result};
use crate::goal::{Goal, GoalProvider};
use crate::golden::GoldenSampleStore;
use crate::graph::snapshot::{self, RepoGraphSnapshot};
use crate::graph::{NodeLocator, RepoGraph};
use crate::ids::{EngineTaskId, GoalId};
use crate::training::AdvertisementStore;

/// Per-engine bookkeeping: which locator a task-id maps back to, so a result can find
/// its way back into the graph (§4.3 "record task-id → locator mapping").
type LocatorMap = TokioMutex<HashMap<EngineTaskId, NodeLocator>>;

pub struct Orchestrator {
    pub(crate) repo: TokioMutex<RepoGraph>,
    pub(crate) goal_provider: Arc<dyn GoalProvider>,
    pub(crate) goals: TokioMutex<HashMap<GoalId, Goal>>,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) inference_engine: Engine,
    pub(crate) compilation_engine: Engine,
    pub(crate) goal_compilation_engine: Engine,
    pub(crate) inference_locators: LocatorMap,
    pub(crate) compilation_locators: LocatorMap,
    pub(crate) goal_compilation_locators: LocatorMap,
    pub(crate) training_store: Arc<AdvertisementStore>,
    pub(crate) golden_store: Arc<GoldenSampleStore>,
    pub(crate) config: OrchestratorConfig,
    pub(crate) weighting: WeightingParams,
    pub(crate) snapshot_path: PathBuf,
    pub(crate) shutdown: CancellationToken,
    fatal: TokioMutex<Option<OrchestratorError>>,
    handles: TokioMutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Load a snapshot from `snapshot_path` if one exists, otherwise start a fresh
    /// `RepoGraph` rooted at `root_branch`; start the three engines; spawn the seven
    /// coordination loops (plus the two training loops, if `config.training_enabled`).
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        root_branch: crate::ids::BranchName,
        broker: Arc<dyn Broker>,
        goal_provider: Arc<dyn GoalProvider>,
        config: OrchestratorConfig,
        scheduling: SchedulingParams,
        weighting: WeightingParams,
        snapshot_path: PathBuf,
    ) -> Result<Arc<Self>> {
        let mut repo = if snapshot_path.exists() {
            info!(path = %snapshot_path.display(), "restoring repo graph from snapshot");
            snapshot::load(&snapshot_path).await?
        } else {
            RepoGraph::new(root_branch)
        };

        let inference_engine =
            Engine::start(EngineJobName::Inference, broker.clone(), scheduling.clone()).await?;
        let compilation_engine =
            Engine::start(EngineJobName::Compilation, broker.clone(), scheduling.clone()).await?;
        let goal_compilation_engine =
            Engine::start(EngineJobName::GoalCompilation, broker.clone(), scheduling.clone()).await?;

        let advertisement_rx = repo.take_advertisement_receiver();

        let orchestrator = Arc::new(Self {
            repo: TokioMutex::new(repo),
            goal_provider,
            goals: TokioMutex::new(HashMap::new()),
            broker,
            inference_engine,
            compilation_engine,
            goal_compilation_engine,
            inference_locators: TokioMutex::new(HashMap::new()),
            compilation_locators: TokioMutex::new(HashMap::new()),
            goal_compilation_locators: TokioMutex::new(HashMap::new()),
            training_store: Arc::new(AdvertisementStore::new()),
            golden_store: Arc::new(GoldenSampleStore::new()),
            config,
            weighting,
            snapshot_path,
            shutdown: CancellationToken::new(),
            fatal: TokioMutex::new(None),
            handles: TokioMutex::new(Vec::new()),
        });

        let mut handles = Vec::new();
        handles.push(tokio::spawn(loops::goal_compilation_tx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::goal_compilation_rx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::inference_tx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::inference_rx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::compilation_tx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::compilation_rx(orchestrator.clone())));
        handles.push(tokio::spawn(loops::periodic_save(orchestrator.clone())));
        if orchestrator.config.training_enabled {
            if let Some(rx) = advertisement_rx {
                handles.push(tokio::spawn(loops::training_tx(orchestrator.clone(), rx)));
                handles.push(tokio::spawn(loops::training_rx(orchestrator.clone())));
            } else {
                warn!("training enabled but advertisement receiver already taken; skipping training loops");
            }
        }
        *orchestrator.handles.lock().await = handles;

        Ok(orchestrator)
    }

    pub fn trigger_stop(&self) {
        self.shutdown.cancel();
        self.inference_engine.trigger_stop();
        self.compilation_engine.trigger_stop();
        self.goal_compilation_engine.trigger_stop();
    }

    pub async fn wait_for_stop(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.inference_engine.wait_for_stop().await;
        self.compilation_engine.wait_for_stop().await;
        self.goal_compilation_engine.wait_for_stop().await;
    }

    pub async fn take_fatal(&self) -> Option<OrchestratorError> {
        self.fatal.lock().await.take()
    }

    pub(crate) async fn mark_fatal(&self, err: OrchestratorError) {
        warn!(error = %err, "orchestrator loop hit a fatal condition, requesting shutdown");
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(err);
        }
        self.trigger_stop();
    }

    pub async fn goal_for(&self, goal_id: &GoalId) -> Option<Goal> {
        self.goals.lock().await.get(goal_id).cloned()
    }

    /// Snapshot the current graph to `snapshot_path` (§4.3 "Periodic save", §6).
    pub async fn save_snapshot(&self) -> Result<()> {
        let repo = self.repo.lock().await;
        let snapshot = RepoGraphSnapshot::from_repo_graph(&repo);
        drop(repo);
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self.snapshot_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;
        Ok(())
    }
}
