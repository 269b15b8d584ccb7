//! Wire and bookkeeping shapes for one job-name's task/processing/results triad (§6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EngineTaskId;

/// A task message as it sits on `{job}:tasks` — and, unchanged, on `{job}:processing`
/// once a worker moves it there. The worker never rewrites the payload, only its
/// location, so one shape serves both queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTaskMsg {
    #[serde(rename = "task_id")]
    pub id: EngineTaskId,
    pub task: String,
}

/// Same wire shape as [`EngineTaskMsg`]; named separately because the spec gives the
/// processing-queue entry its own identity even though the bytes are identical.
pub type EngineTaskProcessingMsg = EngineTaskMsg;

/// A result message as it sits on `{job}:results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTaskResultMsg {
    #[serde(rename = "task_id")]
    pub id: EngineTaskId,
    pub result: String,
}

/// The orchestrator's local mirror of one task currently somewhere in flight.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub msg: EngineTaskMsg,
    pub creation_time: DateTime<Utc>,
    pub processing_start_time: Option<DateTime<Utc>>,
}

impl QueuedTask {
    pub fn new(msg: EngineTaskMsg, now: DateTime<Utc>) -> Self {
        Self {
            msg,
            creation_time: now,
            processing_start_time: None,
        }
    }
}
