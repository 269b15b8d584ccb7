//! The shared key-value queue broker that underlies every durable queue in this crate.
//!
//! The orchestrator never embeds a broker client directly — every pump and loop talks to
//! a `dyn Broker`, so the production [`redis_broker::RedisBroker`] and the
//! [`memory_broker::MemoryBroker`] used in tests are interchangeable. The contract
//! mirrors a Redis list: `push_head` is `LPUSH`, `pop_tail_blocking` is `BRPOP`, and
//! `len`/`delete` are `LLEN`/`DEL`.

pub mod memory_broker;
pub mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// A key-value list broker, the durable substrate for every `J:tasks`/`J:processing`/
/// `J:results` triad and the training channels.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Push `value` onto the head of the list at `key`.
    async fn push_head(&self, key: &str, value: String) -> Result<()>;

    /// Pop one value off the tail of the list at `key`, waiting up to `timeout` if the
    /// list is currently empty. Returns `None` on timeout.
    async fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Pop one value off the tail of the list at `key` without waiting.
    async fn pop_tail(&self, key: &str) -> Result<Option<String>>;

    /// Number of entries currently in the list at `key`.
    async fn len(&self, key: &str) -> Result<usize>;

    /// Delete the list (or key) entirely.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Set a named configuration string value.
    async fn set_config(&self, key: &str, value: String) -> Result<()>;

    /// Read a named configuration string value, if set.
    async fn get_config(&self, key: &str) -> Result<Option<String>>;
}

/// The enumerated set of configuration keys operators may set on the broker (§6).
///
/// Any key outside this set is rejected by [`is_known_config_key`].
pub const KNOWN_CONFIG_KEYS: &[&str] = &[
    "inference:enabled",
    "inference:base_model",
    "inference:adapter",
    "inference:batch_size",
    "inference:load_format",
    "inference:max_model_len",
    "inference:gpu_memory_utilization",
    "inference:max_new_tokens",
    "inference:num_return_sequences",
    "inference:num_beams",
    "training:base_model",
    "training:adapter",
    "training:do_update_adapter",
    "training:autogroup_tokens",
    "execution:repo_url",
];

/// Whether `key` is one of the enumerated, operator-settable configuration keys.
pub fn is_known_config_key(key: &str) -> bool {
    KNOWN_CONFIG_KEYS.contains(&key)
}

/// Broker key names for one job-name's task/processing/results triad (§4.1, §6).
pub struct JobQueueNames {
    pub tasks: String,
    pub processing: String,
    pub results: String,
}

impl JobQueueNames {
    pub fn for_job(job: &str) -> Self {
        Self {
            tasks: format!("{job}:tasks"),
            processing: format!("{job}:processing"),
            results: format!("{job}:results"),
        }
    }
}

/// Broker key names for the training advertisement/request/data channels (§6).
pub mod training_keys {
    pub const ADVERTISEMENT_LIST: &str = "training:advertisement-list";
    pub const REQUEST_CHAN: &str = "training:request-chan";
    pub const DATA_CHAN: &str = "training:data-chan";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keys_outside_the_enumerated_set() {
        assert!(is_known_config_key("inference:enabled"));
        assert!(!is_known_config_key("inference:rogue_flag"));
    }

    #[test]
    fn job_queue_names_follow_the_jtasks_convention() {
        let names = JobQueueNames::for_job("inference-engine");
        assert_eq!(names.tasks, "inference-engine:tasks");
        assert_eq!(names.processing, "inference-engine:processing");
        assert_eq!(names.results, "inference-engine:results");
    }
}
