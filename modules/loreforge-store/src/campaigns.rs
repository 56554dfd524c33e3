use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use loreforge_common::{Campaign, CampaignResource, ExtractionStatus};

#[derive(Clone)]
pub struct CampaignStore {
    pool: PgPool,
}

impl CampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, owner_id: &str, name: &str, description: &str) -> Result<Campaign> {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let campaign = Campaign {
            rag_base_path: Campaign::rag_base_path_for(&id),
            id,
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO campaigns (id, owner_id, name, description, rag_base_path, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.owner_id)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(&campaign.rag_base_path)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(campaign)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_campaign(&r)).transpose()
    }

    /// Tenant-scoped read: campaign must exist AND belong to the owner.
    pub async fn get_owned(&self, id: &str, owner_id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_campaign(&r)).transpose()
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        let rows =
            sqlx::query("SELECT * FROM campaigns WHERE owner_id = $1 ORDER BY created_at DESC")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_campaign).collect()
    }

    pub async fn update(&self, id: &str, name: &str, description: &str) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET name = $2, description = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_all_for_owner(&self, owner_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM campaigns WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct ResourceStore {
    pool: PgPool,
}

impl ResourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent attach: if `(campaign_id, file_key)` already exists, the
    /// existing row is returned and `created` is false.
    pub async fn attach(
        &self,
        campaign_id: &str,
        file_key: &str,
        file_name: &str,
    ) -> Result<(CampaignResource, bool)> {
        let id = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO campaign_resources (id, campaign_id, file_key, file_name, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (campaign_id, file_key) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(campaign_id)
        .bind(file_key)
        .bind(file_name)
        .bind(ExtractionStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() > 0;
        let resource = self
            .get_by_key(campaign_id, file_key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("attached resource vanished: {campaign_id}/{file_key}"))?;
        Ok((resource, created))
    }

    pub async fn get(&self, id: &str) -> Result<Option<CampaignResource>> {
        let row = sqlx::query("SELECT * FROM campaign_resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_resource(&r)).transpose()
    }

    pub async fn get_by_key(
        &self,
        campaign_id: &str,
        file_key: &str,
    ) -> Result<Option<CampaignResource>> {
        let row = sqlx::query(
            "SELECT * FROM campaign_resources WHERE campaign_id = $1 AND file_key = $2",
        )
        .bind(campaign_id)
        .bind(file_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_resource(&r)).transpose()
    }

    pub async fn list_by_campaign(&self, campaign_id: &str) -> Result<Vec<CampaignResource>> {
        let rows = sqlx::query(
            "SELECT * FROM campaign_resources WHERE campaign_id = $1 ORDER BY created_at ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_resource).collect()
    }

    pub async fn set_status(&self, id: &str, status: ExtractionStatus) -> Result<()> {
        sqlx::query("UPDATE campaign_resources SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM campaign_resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_campaign(row: &PgRow) -> Result<Campaign> {
    Ok(Campaign {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        rag_base_path: row.try_get("rag_base_path")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_resource(row: &PgRow) -> Result<CampaignResource> {
    let status: String = row.try_get("status")?;
    Ok(CampaignResource {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        file_key: row.try_get("file_key")?,
        file_name: row.try_get("file_name")?,
        status: status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
