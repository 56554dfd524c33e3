use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Per-actor key/value persistence. Each actor (a user's notification hub,
/// an upload session) sees only its own keyspace. Implementations must treat
/// expired entries as absent.
#[async_trait::async_trait]
pub trait ActorKv: Send + Sync {
    async fn get(&self, actor: &str, key: &str) -> Result<Option<Value>>;

    /// Write a value, optionally with a TTL after which it is unreadable.
    async fn put(&self, actor: &str, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<()>;

    async fn delete(&self, actor: &str, key: &str) -> Result<()>;

    /// All live entries whose key starts with `prefix`, sorted ascending by key.
    async fn list_prefix(&self, actor: &str, prefix: &str) -> Result<Vec<(String, Value)>>;
}

/// In-memory ActorKv used by actor unit tests and local development.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<(String, String), (Value, Option<DateTime<Utc>>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(expires_at: &Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match expires_at {
            Some(t) => *t > now,
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl ActorKv for MemoryKv {
    async fn get(&self, actor: &str, key: &str) -> Result<Option<Value>> {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(actor.to_string(), key.to_string()))
            .filter(|(_, expires)| Self::is_live(expires, now))
            .map(|(v, _)| v.clone()))
    }

    async fn put(
        &self,
        actor: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + d);
        self.entries
            .lock()
            .unwrap()
            .insert((actor.to_string(), key.to_string()), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, actor: &str, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .remove(&(actor.to_string(), key.to_string()));
        Ok(())
    }

    async fn list_prefix(&self, actor: &str, prefix: &str) -> Result<Vec<(String, Value)>> {
        let now = Utc::now();
        let entries = self.entries.lock().unwrap();
        let mut result: Vec<(String, Value)> = entries
            .iter()
            .filter(|((a, k), (_, expires))| {
                a == actor && k.starts_with(prefix) && Self::is_live(expires, now)
            })
            .map(|((_, k), (v, _))| (k.clone(), v.clone()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }
}
