//! Idempotent schema migration, applied at boot.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id           TEXT         PRIMARY KEY,
        display_name TEXT         NOT NULL,
        created_at   TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id         TEXT         PRIMARY KEY,
        owner_id   TEXT         NOT NULL,
        key        TEXT         NOT NULL UNIQUE,
        name       TEXT         NOT NULL,
        size       BIGINT       NOT NULL DEFAULT 0,
        status     TEXT         NOT NULL,
        created_at TIMESTAMPTZ  NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id            TEXT         PRIMARY KEY,
        owner_id      TEXT         NOT NULL,
        name          TEXT         NOT NULL,
        description   TEXT         NOT NULL DEFAULT '',
        rag_base_path TEXT         NOT NULL,
        created_at    TIMESTAMPTZ  NOT NULL DEFAULT now(),
        updated_at    TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_resources (
        id          TEXT         PRIMARY KEY,
        campaign_id TEXT         NOT NULL,
        file_key    TEXT         NOT NULL,
        file_name   TEXT         NOT NULL,
        status      TEXT         NOT NULL,
        created_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
        UNIQUE (campaign_id, file_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shards (
        id          TEXT         PRIMARY KEY,
        campaign_id TEXT         NOT NULL,
        resource_id TEXT         NOT NULL,
        shard_type  TEXT         NOT NULL,
        content     JSONB        NOT NULL,
        metadata    JSONB        NOT NULL,
        created_at  TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS shards_by_resource
        ON shards (campaign_id, resource_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entities (
        id          TEXT         PRIMARY KEY,
        campaign_id TEXT         NOT NULL,
        entity_type TEXT         NOT NULL,
        name        TEXT         NOT NULL,
        content     JSONB        NOT NULL,
        metadata    JSONB        NOT NULL,
        created_at  TIMESTAMPTZ  NOT NULL DEFAULT now(),
        updated_at  TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS entities_by_campaign ON entities (campaign_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_relationships (
        id                TEXT              PRIMARY KEY,
        campaign_id       TEXT              NOT NULL,
        from_entity_id    TEXT              NOT NULL,
        to_entity_id      TEXT              NOT NULL,
        relationship_type TEXT              NOT NULL,
        strength          DOUBLE PRECISION  NOT NULL DEFAULT 0.5,
        metadata          JSONB             NOT NULL,
        UNIQUE (campaign_id, from_entity_id, to_entity_id, relationship_type)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS relationships_by_campaign
        ON entity_relationships (campaign_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS communities (
        id                  TEXT   PRIMARY KEY,
        campaign_id         TEXT   NOT NULL,
        level               INT    NOT NULL DEFAULT 0,
        parent_community_id TEXT,
        entity_ids          JSONB  NOT NULL,
        metadata            JSONB  NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS communities_by_campaign ON communities (campaign_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS community_summaries (
        id           TEXT   PRIMARY KEY,
        community_id TEXT   NOT NULL,
        campaign_id  TEXT   NOT NULL,
        level        INT    NOT NULL DEFAULT 0,
        summary_text TEXT   NOT NULL,
        key_entities JSONB  NOT NULL DEFAULT '[]'::jsonb,
        metadata     JSONB  NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entity_importance (
        entity_id              TEXT              NOT NULL,
        campaign_id            TEXT              NOT NULL,
        pagerank               DOUBLE PRECISION  NOT NULL DEFAULT 0,
        betweenness_centrality DOUBLE PRECISION  NOT NULL DEFAULT 0,
        hierarchy_level        DOUBLE PRECISION  NOT NULL DEFAULT 50,
        importance_score       DOUBLE PRECISION  NOT NULL DEFAULT 0,
        PRIMARY KEY (campaign_id, entity_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS world_state_changelog (
        seq                 BIGSERIAL    PRIMARY KEY,
        id                  TEXT         NOT NULL UNIQUE,
        campaign_id         TEXT         NOT NULL,
        campaign_session_id TEXT,
        ts                  TIMESTAMPTZ  NOT NULL DEFAULT now(),
        payload             JSONB        NOT NULL,
        impact_score        DOUBLE PRECISION NOT NULL DEFAULT 0,
        applied_to_graph    BOOLEAN      NOT NULL DEFAULT false
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS changelog_unapplied
        ON world_state_changelog (campaign_id, applied_to_graph)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rebuild_status (
        id            TEXT         PRIMARY KEY,
        campaign_id   TEXT         NOT NULL,
        rebuild_type  TEXT         NOT NULL,
        status        TEXT         NOT NULL,
        started_at    TIMESTAMPTZ,
        completed_at  TIMESTAMPTZ,
        error_message TEXT,
        metadata      JSONB        NOT NULL DEFAULT '{}'::jsonb,
        created_at    TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rebuild_telemetry (
        id              BIGSERIAL    PRIMARY KEY,
        rebuild_id      TEXT         NOT NULL,
        campaign_id     TEXT         NOT NULL,
        duration_ms     BIGINT       NOT NULL,
        community_count BIGINT       NOT NULL,
        entity_count    BIGINT       NOT NULL,
        secs_since_last BIGINT,
        created_at      TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id          TEXT         PRIMARY KEY,
        user_id     TEXT         NOT NULL,
        campaign_id TEXT         NOT NULL,
        role        TEXT         NOT NULL,
        content     TEXT         NOT NULL,
        agent_type  TEXT,
        created_at  TIMESTAMPTZ  NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS actor_kv (
        actor_id   TEXT         NOT NULL,
        key        TEXT         NOT NULL,
        value      JSONB        NOT NULL,
        expires_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ  NOT NULL DEFAULT now(),
        PRIMARY KEY (actor_id, key)
    )
    "#,
];

/// Apply the schema. Every statement is idempotent, so this is safe to run
/// on every boot.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = DDL.len(), "schema migration applied");
    Ok(())
}
