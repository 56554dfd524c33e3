use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use loreforge_common::{RebuildState, RebuildStatus, RebuildTelemetry, RebuildType};

#[derive(Clone)]
pub struct RebuildStore {
    pool: PgPool,
}

impl RebuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, campaign_id: &str, rebuild_type: RebuildType) -> Result<RebuildStatus> {
        let status = RebuildStatus {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            rebuild_type,
            status: RebuildState::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: serde_json::json!({}),
        };

        sqlx::query(
            r#"
            INSERT INTO rebuild_status (id, campaign_id, rebuild_type, status, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&status.id)
        .bind(&status.campaign_id)
        .bind(status.rebuild_type.to_string())
        .bind(status.status.to_string())
        .bind(&status.metadata)
        .execute(&self.pool)
        .await?;

        Ok(status)
    }

    pub async fn get(&self, id: &str) -> Result<Option<RebuildStatus>> {
        let row = sqlx::query("SELECT * FROM rebuild_status WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_status(&r)).transpose()
    }

    pub async fn mark_in_progress(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE rebuild_status SET status = $2, started_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(RebuildState::InProgress.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE rebuild_status SET status = $2, completed_at = now(), error_message = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(RebuildState::Completed.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE rebuild_status SET status = $2, completed_at = now(), error_message = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(RebuildState::Failed.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_cancelled(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE rebuild_status SET status = $2, completed_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(RebuildState::Cancelled.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_for_campaign(&self, campaign_id: &str) -> Result<Option<RebuildStatus>> {
        let row = sqlx::query(
            "SELECT * FROM rebuild_status WHERE campaign_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_status(&r)).transpose()
    }

    /// When the previous completed rebuild finished, if ever.
    pub async fn last_completed_at(&self, campaign_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT completed_at FROM rebuild_status
            WHERE campaign_id = $1 AND status = 'completed' AND completed_at IS NOT NULL
            ORDER BY completed_at DESC LIMIT 1
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| r.try_get("completed_at").ok()))
    }

    pub async fn record_telemetry(&self, telemetry: &RebuildTelemetry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rebuild_telemetry
                (rebuild_id, campaign_id, duration_ms, community_count, entity_count, secs_since_last)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&telemetry.rebuild_id)
        .bind(&telemetry.campaign_id)
        .bind(telemetry.duration_ms)
        .bind(telemetry.community_count)
        .bind(telemetry.entity_count)
        .bind(telemetry.secs_since_last)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_telemetry(&self, campaign_id: &str) -> Result<Vec<RebuildTelemetry>> {
        let rows = sqlx::query(
            "SELECT * FROM rebuild_telemetry WHERE campaign_id = $1 ORDER BY created_at DESC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_telemetry).collect()
    }
}

fn row_to_status(row: &PgRow) -> Result<RebuildStatus> {
    let rebuild_type: String = row.try_get("rebuild_type")?;
    let status: String = row.try_get("status")?;
    Ok(RebuildStatus {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        rebuild_type: rebuild_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        metadata: row.try_get("metadata")?,
    })
}

fn row_to_telemetry(row: &PgRow) -> Result<RebuildTelemetry> {
    Ok(RebuildTelemetry {
        rebuild_id: row.try_get("rebuild_id")?,
        campaign_id: row.try_get("campaign_id")?,
        duration_ms: row.try_get("duration_ms")?,
        community_count: row.try_get("community_count")?,
        entity_count: row.try_get("entity_count")?,
        secs_since_last: row.try_get("secs_since_last")?,
        created_at: row.try_get("created_at")?,
    })
}
