//! End-to-end extraction pipeline test against a canned AI-search provider.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use ai_client::{AiError, AiSearch, SearchRequest};
use loreforge_common::{ActorKv, ExtractionStatus, MemoryKv, ShardStatus};
use loreforge_hub::{HubRegistry, QUEUE_PREFIX};
use loreforge_rebuild::{ChangelogRecorder, ImpactAccumulator};
use loreforge_store::{
    migrate, CampaignStore, ChangelogStore, EntityStore, ResourceStore, ShardStore,
};
use loreforge_extract::{ExtractionConfig, ExtractionTask, ExtractionWorker};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate::migrate(&pool).await.ok()?;
    Some(pool)
}

/// Returns a structured response on the first chunk and nothing afterwards.
struct CannedSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl AiSearch for CannedSearch {
    async fn search(&self, _request: SearchRequest) -> Result<String, AiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(r#"```json
{
  "npc": [
    {"name": "Strahd", "relationships": [{"type": "enemy_of", "target": "Ireena", "strength": 0.9}]},
    {"name": "Ireena"}
  ],
  "meta": {"source": "test"}
}
```"#
                .to_string())
        } else {
            Ok(r#"{"meta": {}}"#.to_string())
        }
    }
}

fn fast_config() -> ExtractionConfig {
    ExtractionConfig {
        chunk_delay: Duration::ZERO,
        task_retry_delays: vec![Duration::ZERO],
        timeout_backoff: vec![Duration::ZERO],
        capacity_backoff: vec![Duration::ZERO],
        ..Default::default()
    }
}

#[tokio::test]
async fn extraction_pipeline_persists_shards_graph_and_changelog() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let campaigns = CampaignStore::new(pool.clone());
    let resources = ResourceStore::new(pool.clone());
    let owner = format!("owner-{}", Uuid::new_v4());
    let campaign = campaigns.create(&owner, "Ravenloft", "").await.unwrap();
    let (resource, _) = resources
        .attach(&campaign.id, "f1", "tome.pdf")
        .await
        .unwrap();

    let kv = Arc::new(MemoryKv::new());
    let hubs = Arc::new(HubRegistry::new(kv.clone()));
    let recorder = ChangelogRecorder::new(
        ChangelogStore::new(pool.clone()),
        None,
        Arc::new(ImpactAccumulator::new()),
        5.0,
        None,
    );
    let worker = ExtractionWorker::new(
        Arc::new(CannedSearch {
            calls: AtomicUsize::new(0),
        }),
        campaigns.clone(),
        resources.clone(),
        ShardStore::new(pool.clone()),
        EntityStore::new(pool.clone()),
        recorder,
        hubs,
        fast_config(),
    );

    let task = ExtractionTask {
        username: owner.clone(),
        campaign_id: campaign.id.clone(),
        resource_id: resource.id.clone(),
        resource_name: resource.file_name.clone(),
        file_key: resource.file_key.clone(),
    };
    worker.run_task(&task).await;

    // Resource reached its terminal state.
    let resource = resources.get(&resource.id).await.unwrap().unwrap();
    assert_eq!(resource.status, ExtractionStatus::Completed);

    // Shards persisted in one batch.
    let shards = ShardStore::new(pool.clone())
        .list_by_resource(&campaign.id, &resource.id)
        .await
        .unwrap();
    assert_eq!(shards.len(), 2);

    // Entities landed in staging with tenant-scoped ids.
    let entities = EntityStore::new(pool.clone());
    let strahd = entities
        .get(&format!("{}_strahd", campaign.id))
        .await
        .unwrap()
        .expect("strahd entity");
    assert_eq!(strahd.metadata.shard_status, ShardStatus::Staging);

    let relationships = entities
        .list_relationships_for_campaign(&campaign.id)
        .await
        .unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(
        relationships[0].to_entity_id,
        format!("{}_ireena", campaign.id)
    );

    // One changelog entry describing the batch.
    let entries = ChangelogStore::new(pool.clone())
        .list_for_campaign(&campaign.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload.new_entities.len(), 2);
    assert_eq!(entries[0].payload.relationship_updates.len(), 1);
    assert!(!entries[0].applied_to_graph);
    assert!(entries[0].impact_score > 0.0);

    // With nobody subscribed, lifecycle notifications queued in the KV.
    let queued = kv.list_prefix(&owner, QUEUE_PREFIX).await.unwrap();
    assert!(
        queued.len() >= 3,
        "expected start, chunk, and summary notifications, got {}",
        queued.len()
    );
}

#[tokio::test]
async fn rerunning_extraction_is_idempotent_for_the_graph() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let campaigns = CampaignStore::new(pool.clone());
    let resources = ResourceStore::new(pool.clone());
    let owner = format!("owner-{}", Uuid::new_v4());
    let campaign = campaigns.create(&owner, "Ravenloft", "").await.unwrap();
    let (resource, _) = resources
        .attach(&campaign.id, "f1", "tome.pdf")
        .await
        .unwrap();

    let entities = EntityStore::new(pool.clone());
    let make_worker = || {
        ExtractionWorker::new(
            Arc::new(CannedSearch {
                calls: AtomicUsize::new(0),
            }),
            campaigns.clone(),
            resources.clone(),
            ShardStore::new(pool.clone()),
            entities.clone(),
            ChangelogRecorder::new(
                ChangelogStore::new(pool.clone()),
                None,
                Arc::new(ImpactAccumulator::new()),
                5.0,
                None,
            ),
            Arc::new(HubRegistry::new(Arc::new(MemoryKv::new()))),
            fast_config(),
        )
    };

    let task = ExtractionTask {
        username: owner.clone(),
        campaign_id: campaign.id.clone(),
        resource_id: resource.id.clone(),
        resource_name: resource.file_name.clone(),
        file_key: resource.file_key.clone(),
    };
    make_worker().run_task(&task).await;
    make_worker().run_task(&task).await;

    // Re-extraction merged into the same entity rows and edge.
    let all = entities.list_for_campaign(&campaign.id).await.unwrap();
    assert_eq!(all.len(), 2);
    let relationships = entities
        .list_relationships_for_campaign(&campaign.id)
        .await
        .unwrap();
    assert_eq!(relationships.len(), 1);

    // The second run is classified as updates, not new entities.
    let entries = ChangelogStore::new(pool.clone())
        .list_for_campaign(&campaign.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].payload.new_entities.len(), 0);
    assert_eq!(entries[1].payload.entity_updates.len(), 2);
}
