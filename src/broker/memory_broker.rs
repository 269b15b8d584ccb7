//! An in-process broker used by tests and by demos that don't want a live Redis.
//!
//! Implements the same list semantics as [`super::redis_broker::RedisBroker`] over a
//! plain `HashMap<String, VecDeque<String>>` guarded by a single mutex, with a
//! [`tokio::sync::Notify`] used to wake blocked pops as soon as any key changes.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::Broker;
use crate::errors::Result;

#[derive(Default)]
pub struct MemoryBroker {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    config: Mutex<HashMap<String, String>>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push_head(&self, key: &str, value: String) -> Result<()> {
        let mut lists = self.lists.lock().await;
        lists.entry(key.to_string()).or_default().push_front(value);
        drop(lists);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(value) = self.pop_tail(key).await? {
                return Ok(Some(value));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;
            // Wake on any push, or on the remaining timeout, whichever comes first.
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn pop_tail(&self, key: &str) -> Result<Option<String>> {
        let mut lists = self.lists.lock().await;
        Ok(lists.get_mut(key).and_then(|list| list.pop_back()))
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let lists = self.lists.lock().await;
        Ok(lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut lists = self.lists.lock().await;
        lists.remove(key);
        Ok(())
    }

    async fn set_config(&self, key: &str, value: String) -> Result<()> {
        self.config.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        Ok(self.config.lock().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_is_fifo_from_the_producers_perspective() {
        let broker = MemoryBroker::new();
        broker.push_head("k", "a".into()).await.unwrap();
        broker.push_head("k", "b".into()).await.unwrap();
        // b is pushed onto the head last, so it is read first from the head,
        // and the tail pop drains in push order: a then b.
        assert_eq!(broker.pop_tail("k").await.unwrap(), Some("a".into()));
        assert_eq!(broker.pop_tail("k").await.unwrap(), Some("b".into()));
        assert_eq!(broker.pop_tail("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocking_pop_times_out_on_an_empty_list() {
        let broker = MemoryBroker::new();
        let got = broker
            .pop_tail_blocking("missing", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn blocking_pop_wakes_as_soon_as_a_value_is_pushed() {
        let broker = std::sync::Arc::new(MemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .pop_tail_blocking("k", Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.push_head("k", "value".into()).await.unwrap();
        let got = waiter.await.unwrap();
        assert_eq!(got, Some("value".into()));
    }

    #[tokio::test]
    async fn unknown_config_keys_round_trip_too_validation_is_the_callers_job() {
        let broker = MemoryBroker::new();
        broker
            .set_config("inference:enabled", "true".into())
            .await
            .unwrap();
        assert_eq!(
            broker.get_config("inference:enabled").await.unwrap(),
            Some("true".into())
        );
        assert_eq!(broker.get_config("missing").await.unwrap(), None);
    }
}
