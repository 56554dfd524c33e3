use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

use loreforge_common::ActorKv;

/// Postgres-backed `ActorKv`. Expiry is enforced on read; `sweep_expired`
/// physically removes dead rows.
#[derive(Clone)]
pub struct PgActorKv {
    pool: PgPool,
}

impl PgActorKv {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete every expired row across all actors. Returns rows removed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM actor_kv WHERE expires_at IS NOT NULL AND expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ActorKv for PgActorKv {
    async fn get(&self, actor: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM actor_kv
            WHERE actor_id = $1 AND key = $2
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(actor)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<Value, _>("value")))
    }

    async fn put(
        &self,
        actor: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + d);
        sqlx::query(
            r#"
            INSERT INTO actor_kv (actor_id, key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (actor_id, key)
            DO UPDATE SET value = $3, expires_at = $4, updated_at = now()
            "#,
        )
        .bind(actor)
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, actor: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM actor_kv WHERE actor_id = $1 AND key = $2")
            .bind(actor)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_prefix(&self, actor: &str, prefix: &str) -> Result<Vec<(String, Value)>> {
        let pattern = format!("{}%", escape_like(prefix));
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM actor_kv
            WHERE actor_id = $1 AND key LIKE $2
              AND (expires_at IS NULL OR expires_at > now())
            ORDER BY key ASC
            "#,
        )
        .bind(actor)
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Value, _>("value")))
            .collect())
    }
}

/// Escape LIKE metacharacters so a prefix is matched literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("queued_notification:"), "queued\\_notification:");
        assert_eq!(escape_like("100%"), "100\\%");
    }
}
