//! Append-only world-state changelog. Entries are totally ordered within a
//! campaign by `(ts, seq)`; the orchestrator marks them applied after a
//! completed rebuild whose snapshot included them.

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use loreforge_common::ChangelogEntry;

#[derive(Clone)]
pub struct ChangelogStore {
    pool: PgPool,
}

impl ChangelogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &ChangelogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO world_state_changelog
                (id, campaign_id, campaign_session_id, ts, payload, impact_score, applied_to_graph)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.campaign_id)
        .bind(&entry.campaign_session_id)
        .bind(entry.timestamp)
        .bind(serde_json::to_value(&entry.payload)?)
        .bind(entry.impact_score)
        .bind(entry.applied_to_graph)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Unapplied entries for a campaign, in application order.
    pub async fn unapplied(&self, campaign_id: &str) -> Result<Vec<ChangelogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM world_state_changelog
            WHERE campaign_id = $1 AND applied_to_graph = false
            ORDER BY ts ASC, seq ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Sum of unapplied impact for a campaign.
    pub async fn unapplied_impact(&self, campaign_id: &str) -> Result<f64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(impact_score), 0) AS total
            FROM world_state_changelog
            WHERE campaign_id = $1 AND applied_to_graph = false
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("total")?)
    }

    /// Campaigns that still have unapplied entries (used to rehydrate the
    /// impact accumulator after a restart).
    pub async fn campaigns_with_unapplied(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT campaign_id FROM world_state_changelog WHERE applied_to_graph = false",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("campaign_id"))
            .collect())
    }

    pub async fn mark_applied(&self, ids: &[String]) -> Result<u64> {
        let result =
            sqlx::query("UPDATE world_state_changelog SET applied_to_graph = true WHERE id = ANY($1)")
                .bind(ids)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<ChangelogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM world_state_changelog
            WHERE campaign_id = $1
            ORDER BY ts ASC, seq ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &PgRow) -> Result<ChangelogEntry> {
    Ok(ChangelogEntry {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        campaign_session_id: row.try_get("campaign_session_id")?,
        timestamp: row.try_get("ts")?,
        payload: serde_json::from_value(row.try_get("payload")?)?,
        impact_score: row.try_get("impact_score")?,
        applied_to_graph: row.try_get("applied_to_graph")?,
    })
}
