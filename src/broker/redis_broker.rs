//! Redis-backed [`Broker`] implementation.
//!
//! Connects with a [`redis::aio::ConnectionManager`], which transparently reconnects
//! and re-authenticates across transient network failures so that individual pump
//! ticks only have to worry about per-call errors, not connection lifecycle.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::Broker;
use crate::errors::{OrchestratorError, Result};

pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect using `REDIS_ADDRESS`, `REDIS_PORT`, and `REDIS_PASSWORD` from the
    /// environment. Loading these is the orchestrator binary's job, not this crate's;
    /// this constructor only reads them because there is nowhere else they could come
    /// from without reinventing a configuration layer.
    pub async fn connect_from_env() -> Result<Self> {
        let host = env::var("REDIS_ADDRESS")
            .map_err(|_| OrchestratorError::Custom("REDIS_ADDRESS must be set".into()))?;
        let port = env::var("REDIS_PORT")
            .map_err(|_| OrchestratorError::Custom("REDIS_PORT must be set".into()))?;
        let password = env::var("REDIS_PASSWORD")
            .map_err(|_| OrchestratorError::Custom("REDIS_PASSWORD must be set".into()))?;
        let url = format!("redis://:{password}@{host}:{port}/0");
        Self::connect(&url).await
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_head(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }

    async fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let reply: Option<(String, String)> = conn
            .brpop(key, timeout.as_secs_f64())
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn pop_tail(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.rpop(key, None)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        conn.llen(key)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }

    async fn set_config(&self, key: &str, value: String) -> Result<()> {
        if !super::is_known_config_key(key) {
            return Err(OrchestratorError::Custom(format!(
                "refusing to set unknown config key `{key}`"
            )));
        }
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| OrchestratorError::BrokerTransport(e.to_string()))
    }
}
