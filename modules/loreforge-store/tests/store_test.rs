//! Integration tests for the Postgres stores.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use loreforge_common::{
    ChangelogEntry, ChangelogPayload, ContentType, Entity, EntityChange, EntityMetadata,
    EntityUpdate, ExtractionStatus,
};
use loreforge_store::{migrate, CampaignStore, ChangelogStore, EntityStore, ResourceStore};

/// Get a migrated test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate::migrate(&pool).await.ok()?;
    Some(pool)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

// =========================================================================
// Attach idempotency
// =========================================================================

#[tokio::test]
async fn attach_same_file_twice_returns_same_resource() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let campaigns = CampaignStore::new(pool.clone());
    let resources = ResourceStore::new(pool);

    let campaign = campaigns
        .create(&unique("owner"), "Curse of the Amber Keep", "")
        .await
        .unwrap();

    let (first, created_first) = resources
        .attach(&campaign.id, "f1", "tome.pdf")
        .await
        .unwrap();
    let (second, created_second) = resources
        .attach(&campaign.id, "f1", "tome.pdf")
        .await
        .unwrap();

    assert!(created_first);
    assert!(!created_second);
    assert_eq!(first.id, second.id);
    assert_eq!(first.status, ExtractionStatus::Pending);

    let listed = resources.list_by_campaign(&campaign.id).await.unwrap();
    assert_eq!(
        listed.iter().filter(|r| r.file_key == "f1").count(),
        1,
        "exactly one row per (campaign, file_key)"
    );
}

// =========================================================================
// Entity upsert merge
// =========================================================================

#[tokio::test]
async fn entity_upsert_merges_on_collision() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let entities = EntityStore::new(pool);
    let campaign_id = unique("c");
    let id = format!("{campaign_id}_strahd");

    let now = Utc::now();
    let first = Entity {
        id: id.clone(),
        campaign_id: campaign_id.clone(),
        entity_type: ContentType::Npc,
        name: "Strahd".to_string(),
        content: json!({"home": "Ravenloft"}),
        metadata: EntityMetadata::default(),
        created_at: now,
        updated_at: now,
    };
    entities.upsert(&first).await.unwrap();

    let second = Entity {
        content: json!({"alignment": "LE"}),
        updated_at: Utc::now(),
        ..first.clone()
    };
    entities.upsert(&second).await.unwrap();

    let stored = entities.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.content["home"], "Ravenloft");
    assert_eq!(stored.content["alignment"], "LE");
}

// =========================================================================
// Changelog ordering and application
// =========================================================================

#[tokio::test]
async fn changelog_orders_and_marks_applied() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let changelog = ChangelogStore::new(pool);
    let campaign_id = unique("c");

    let mut ids = Vec::new();
    for (i, impact) in [1.2f64, 1.5, 3.0].iter().enumerate() {
        let id = unique("cl");
        ids.push(id.clone());
        changelog
            .append(&ChangelogEntry {
                id,
                campaign_id: campaign_id.clone(),
                campaign_session_id: None,
                timestamp: Utc::now(),
                payload: ChangelogPayload {
                    timestamp: i as i64,
                    entity_updates: vec![EntityUpdate {
                        entity_id: format!("{campaign_id}_e{i}"),
                        change: EntityChange::Modified,
                        detail: None,
                    }],
                    relationship_updates: vec![],
                    new_entities: vec![],
                },
                impact_score: *impact,
                applied_to_graph: false,
            })
            .await
            .unwrap();
    }

    let unapplied = changelog.unapplied(&campaign_id).await.unwrap();
    assert_eq!(unapplied.len(), 3);
    assert_eq!(
        unapplied.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        ids,
        "entries come back in insertion order"
    );

    let total = changelog.unapplied_impact(&campaign_id).await.unwrap();
    assert!((total - 5.7).abs() < 1e-9);

    changelog.mark_applied(&ids).await.unwrap();
    assert!(changelog.unapplied(&campaign_id).await.unwrap().is_empty());
    assert_eq!(changelog.unapplied_impact(&campaign_id).await.unwrap(), 0.0);
}
