//! Knowledge-graph persistence: shards, entities, relationships, communities,
//! summaries, and importance rows.

use anyhow::Result;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use loreforge_common::{
    Community, CommunitySummary, Entity, EntityImportance, EntityMetadata, EntityRelationship,
    RelationshipMetadata, Shard, ShardStatus,
};

// ---------------------------------------------------------------------------
// Shards
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ShardStore {
    pool: PgPool,
}

impl ShardStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one extraction batch. Shards are immutable; re-extraction
    /// inserts new rows rather than touching old ones.
    pub async fn insert_batch(&self, shards: &[Shard]) -> Result<()> {
        for shard in shards {
            sqlx::query(
                r#"
                INSERT INTO shards (id, campaign_id, resource_id, shard_type, content, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&shard.id)
            .bind(&shard.campaign_id)
            .bind(&shard.resource_id)
            .bind(shard.shard_type.as_str())
            .bind(&shard.content)
            .bind(serde_json::to_value(&shard.metadata)?)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_resource(
        &self,
        campaign_id: &str,
        resource_id: &str,
    ) -> Result<Vec<Shard>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM shards
            WHERE campaign_id = $1 AND resource_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_shard).collect()
    }
}

// ---------------------------------------------------------------------------
// Entities & relationships
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct EntityStore {
    pool: PgPool,
}

impl EntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or merge. A collision on the id (same campaign + slug) merges
    /// the incoming row into the existing one; review flags survive the merge
    /// so a re-extraction can never un-reject an entity.
    pub async fn upsert(&self, entity: &Entity) -> Result<Entity> {
        let existing = self.get(&entity.id).await?;
        let merged = match existing {
            Some(current) => merge_entities(current, entity.clone()),
            None => entity.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO entities (id, campaign_id, entity_type, name, content, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                entity_type = $3, name = $4, content = $5, metadata = $6, updated_at = $8
            "#,
        )
        .bind(&merged.id)
        .bind(&merged.campaign_id)
        .bind(merged.entity_type.as_str())
        .bind(&merged.name)
        .bind(&merged.content)
        .bind(serde_json::to_value(&merged.metadata)?)
        .bind(merged.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(merged)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_entity(&r)).transpose()
    }

    pub async fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE campaign_id = $1 ORDER BY id ASC")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entity).collect()
    }

    pub async fn exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM entities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn set_metadata(&self, id: &str, metadata: &EntityMetadata) -> Result<()> {
        sqlx::query("UPDATE entities SET metadata = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(metadata)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Physical delete — only the explicit delete tool path lands here.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM entities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_relationship(&self, rel: &EntityRelationship) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_relationships
                (id, campaign_id, from_entity_id, to_entity_id, relationship_type, strength, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (campaign_id, from_entity_id, to_entity_id, relationship_type)
            DO UPDATE SET strength = $6, metadata = $7
            "#,
        )
        .bind(&rel.id)
        .bind(&rel.campaign_id)
        .bind(&rel.from_entity_id)
        .bind(&rel.to_entity_id)
        .bind(rel.relationship_type.as_str())
        .bind(rel.strength)
        .bind(serde_json::to_value(&rel.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_relationships_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<EntityRelationship>> {
        let rows =
            sqlx::query("SELECT * FROM entity_relationships WHERE campaign_id = $1 ORDER BY id ASC")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_relationship).collect()
    }

    /// Relationships where both endpoints are in `entity_ids`.
    pub async fn list_relationships_among(
        &self,
        campaign_id: &str,
        entity_ids: &[String],
    ) -> Result<Vec<EntityRelationship>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM entity_relationships
            WHERE campaign_id = $1
              AND from_entity_id = ANY($2)
              AND to_entity_id = ANY($2)
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_relationship).collect()
    }

    pub async fn set_relationship_metadata(
        &self,
        id: &str,
        metadata: &RelationshipMetadata,
    ) -> Result<()> {
        sqlx::query("UPDATE entity_relationships SET metadata = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(metadata)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Physical delete — only the explicit delete tool path lands here.
    pub async fn delete_relationship(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM entity_relationships WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Merge an incoming entity into the current row: incoming non-null content
/// fields win, review flags and overrides on the current row survive.
pub fn merge_entities(current: Entity, incoming: Entity) -> Entity {
    let content = merge_json_objects(current.content, incoming.content);

    let metadata = EntityMetadata {
        // Review decisions outlive re-extraction: keep a non-staging status.
        shard_status: if current.metadata.shard_status != ShardStatus::Staging {
            current.metadata.shard_status
        } else {
            incoming.metadata.shard_status
        },
        ignored: current.metadata.ignored || incoming.metadata.ignored,
        rejected: current.metadata.rejected || incoming.metadata.rejected,
        importance_override: incoming
            .metadata
            .importance_override
            .or(current.metadata.importance_override),
        importance_score: incoming
            .metadata
            .importance_score
            .or(current.metadata.importance_score),
    };

    Entity {
        id: current.id,
        campaign_id: current.campaign_id,
        entity_type: incoming.entity_type,
        name: incoming.name,
        content,
        metadata,
        created_at: current.created_at,
        updated_at: incoming.updated_at,
    }
}

fn merge_json_objects(
    current: serde_json::Value,
    incoming: serde_json::Value,
) -> serde_json::Value {
    match (current, incoming) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(overlay)) => {
            for (k, v) in overlay {
                if !v.is_null() {
                    base.insert(k, v);
                }
            }
            serde_json::Value::Object(base)
        }
        // Non-object content: most recent non-null wins.
        (current, serde_json::Value::Null) => current,
        (_, incoming) => incoming,
    }
}

// ---------------------------------------------------------------------------
// Communities & summaries
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CommunityStore {
    pool: PgPool,
}

impl CommunityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_batch(&self, communities: &[Community]) -> Result<()> {
        for community in communities {
            sqlx::query(
                r#"
                INSERT INTO communities (id, campaign_id, level, parent_community_id, entity_ids, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&community.id)
            .bind(&community.campaign_id)
            .bind(community.level)
            .bind(&community.parent_community_id)
            .bind(serde_json::to_value(&community.entity_ids)?)
            .bind(&community.metadata)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<Community>> {
        let rows = sqlx::query(
            "SELECT * FROM communities WHERE campaign_id = $1 ORDER BY level ASC, id ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_community).collect()
    }

    /// Communities containing any of the given entities, at any level.
    pub async fn find_containing(
        &self,
        campaign_id: &str,
        entity_ids: &[String],
    ) -> Result<Vec<Community>> {
        let all = self.list_for_campaign(campaign_id).await?;
        Ok(all
            .into_iter()
            .filter(|c| c.entity_ids.iter().any(|id| entity_ids.contains(id)))
            .collect())
    }

    pub async fn delete_for_campaign(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM communities WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM communities WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_campaign(&self, campaign_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM communities WHERE campaign_id = $1")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[derive(Clone)]
pub struct SummaryStore {
    pool: PgPool,
}

impl SummaryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, summary: &CommunitySummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO community_summaries
                (id, community_id, campaign_id, level, summary_text, key_entities, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                summary_text = $5, key_entities = $6, metadata = $7
            "#,
        )
        .bind(&summary.id)
        .bind(&summary.community_id)
        .bind(&summary.campaign_id)
        .bind(summary.level)
        .bind(&summary.summary_text)
        .bind(serde_json::to_value(&summary.key_entities)?)
        .bind(&summary.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<CommunitySummary>> {
        let rows = sqlx::query(
            "SELECT * FROM community_summaries WHERE campaign_id = $1 ORDER BY level ASC, id ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_summary).collect()
    }

    /// Summaries are derived data: when their communities go, they go.
    pub async fn delete_for_communities(&self, community_ids: &[String]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM community_summaries WHERE community_id = ANY($1)")
            .bind(community_ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_campaign(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM community_summaries WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Importance
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ImportanceStore {
    pool: PgPool,
}

impl ImportanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_batch(&self, rows: &[EntityImportance]) -> Result<()> {
        for imp in rows {
            sqlx::query(
                r#"
                INSERT INTO entity_importance
                    (entity_id, campaign_id, pagerank, betweenness_centrality, hierarchy_level, importance_score)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (campaign_id, entity_id) DO UPDATE SET
                    pagerank = $3, betweenness_centrality = $4,
                    hierarchy_level = $5, importance_score = $6
                "#,
            )
            .bind(&imp.entity_id)
            .bind(&imp.campaign_id)
            .bind(imp.pagerank)
            .bind(imp.betweenness_centrality)
            .bind(imp.hierarchy_level)
            .bind(imp.importance_score)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get(&self, campaign_id: &str, entity_id: &str) -> Result<Option<EntityImportance>> {
        let row = sqlx::query(
            "SELECT * FROM entity_importance WHERE campaign_id = $1 AND entity_id = $2",
        )
        .bind(campaign_id)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_importance(&r)).transpose()
    }

    pub async fn list_for_campaign(&self, campaign_id: &str) -> Result<Vec<EntityImportance>> {
        let rows = sqlx::query(
            "SELECT * FROM entity_importance WHERE campaign_id = $1 ORDER BY entity_id ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_importance).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_shard(row: &PgRow) -> Result<Shard> {
    let shard_type: String = row.try_get("shard_type")?;
    Ok(Shard {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        resource_id: row.try_get("resource_id")?,
        shard_type: shard_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        content: row.try_get("content")?,
        metadata: serde_json::from_value(row.try_get("metadata")?)?,
    })
}

fn row_to_entity(row: &PgRow) -> Result<Entity> {
    let entity_type: String = row.try_get("entity_type")?;
    Ok(Entity {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        entity_type: entity_type.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        name: row.try_get("name")?,
        content: row.try_get("content")?,
        metadata: serde_json::from_value(row.try_get("metadata")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_relationship(row: &PgRow) -> Result<EntityRelationship> {
    let relationship_type: String = row.try_get("relationship_type")?;
    Ok(EntityRelationship {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        from_entity_id: row.try_get("from_entity_id")?,
        to_entity_id: row.try_get("to_entity_id")?,
        relationship_type: relationship_type
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
        strength: row.try_get("strength")?,
        metadata: serde_json::from_value(row.try_get("metadata")?)?,
    })
}

fn row_to_community(row: &PgRow) -> Result<Community> {
    Ok(Community {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        level: row.try_get("level")?,
        parent_community_id: row.try_get("parent_community_id")?,
        entity_ids: serde_json::from_value(row.try_get("entity_ids")?)?,
        metadata: row.try_get("metadata")?,
    })
}

fn row_to_summary(row: &PgRow) -> Result<CommunitySummary> {
    Ok(CommunitySummary {
        id: row.try_get("id")?,
        community_id: row.try_get("community_id")?,
        campaign_id: row.try_get("campaign_id")?,
        level: row.try_get("level")?,
        summary_text: row.try_get("summary_text")?,
        key_entities: serde_json::from_value(row.try_get("key_entities")?)?,
        metadata: row.try_get("metadata")?,
    })
}

fn row_to_importance(row: &PgRow) -> Result<EntityImportance> {
    Ok(EntityImportance {
        entity_id: row.try_get("entity_id")?,
        campaign_id: row.try_get("campaign_id")?,
        pagerank: row.try_get("pagerank")?,
        betweenness_centrality: row.try_get("betweenness_centrality")?,
        hierarchy_level: row.try_get("hierarchy_level")?,
        importance_score: row.try_get("importance_score")?,
    })
}
