//! Integration tests for changelog recording and the rebuild pipeline.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use loreforge_common::{
    ChangelogPayload, EntityChange, EntityUpdate, MemoryKv, NewEntity, RebuildState,
    RebuildType, RelationshipUpdate,
};
use loreforge_graph::{
    CommunityDetector, DetectionParams, GraphCaps, GraphLoader, ImportanceCalculator,
};
use loreforge_hub::HubRegistry;
use loreforge_rebuild::{
    ChangelogRecorder, ImpactAccumulator, OrchestratorConfig, RebuildOrchestrator,
};
use loreforge_store::{
    migrate, CampaignStore, ChangelogStore, CommunityStore, EntityStore, ImportanceStore,
    RebuildStore, SummaryStore,
};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    migrate::migrate(&pool).await.ok()?;
    Some(pool)
}

fn orchestrator(
    pool: &PgPool,
    accumulator: Arc<ImpactAccumulator>,
    config: OrchestratorConfig,
) -> RebuildOrchestrator {
    let entities = EntityStore::new(pool.clone());
    let loader = GraphLoader::new(entities.clone(), GraphCaps::default());
    let detector = CommunityDetector::new(
        loader.clone(),
        CommunityStore::new(pool.clone()),
        SummaryStore::new(pool.clone()),
        DetectionParams::default(),
    );
    let importance = ImportanceCalculator::new(
        loader,
        entities,
        CommunityStore::new(pool.clone()),
        ImportanceStore::new(pool.clone()),
    );
    RebuildOrchestrator::new(
        CampaignStore::new(pool.clone()),
        ChangelogStore::new(pool.clone()),
        RebuildStore::new(pool.clone()),
        detector,
        importance,
        None,
        Arc::new(HubRegistry::new(Arc::new(MemoryKv::new()))),
        accumulator,
        config,
    )
}

fn payload(eu: usize, ru: usize, ne: usize) -> ChangelogPayload {
    ChangelogPayload {
        timestamp: loreforge_common::epoch_ms_now(),
        entity_updates: (0..eu)
            .map(|i| EntityUpdate {
                entity_id: format!("e{i}"),
                change: EntityChange::Modified,
                detail: None,
            })
            .collect(),
        relationship_updates: (0..ru)
            .map(|i| RelationshipUpdate {
                from_entity_id: format!("e{i}"),
                to_entity_id: format!("f{i}"),
                relationship_type: None,
                detail: None,
            })
            .collect(),
        new_entities: (0..ne)
            .map(|i| NewEntity {
                entity_id: format!("n{i}"),
                name: None,
                entity_type: None,
            })
            .collect(),
    }
}

// =========================================================================
// Scenario: impact threshold triggers exactly one full rebuild
// =========================================================================

#[tokio::test]
async fn impact_threshold_triggers_one_full_rebuild() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let campaigns = CampaignStore::new(pool.clone());
    let campaign = campaigns
        .create(&format!("owner-{}", Uuid::new_v4()), "Threshold", "")
        .await
        .unwrap();

    let accumulator = Arc::new(ImpactAccumulator::new());
    let (tx, mut rx) = mpsc::channel(8);
    let recorder = ChangelogRecorder::new(
        ChangelogStore::new(pool.clone()),
        None, // flat scoring
        accumulator.clone(),
        5.0,
        Some(tx),
    );

    // Flat impacts 1.2, 1.5, 3.0 — only the third crosses the threshold.
    recorder
        .record(&campaign.id, None, payload(0, 0, 1))
        .await
        .unwrap();
    recorder
        .record(&campaign.id, None, payload(0, 1, 0))
        .await
        .unwrap();
    assert!(rx.try_recv().is_err(), "below threshold, no rebuild nudge");

    recorder
        .record(&campaign.id, None, payload(3, 0, 0))
        .await
        .unwrap();
    let request = rx.try_recv().expect("threshold crossing sends a nudge");
    assert_eq!(request.campaign_id, campaign.id);
    assert!((accumulator.get(&campaign.id) - 5.7).abs() < 1e-9);

    let config = OrchestratorConfig {
        impact_threshold: 5.0,
        partial_max_entities: 0, // force full
        summaries_enabled: false,
        retry_delays: vec![Duration::ZERO],
    };
    let orch = orchestrator(&pool, accumulator.clone(), config);

    let status = orch
        .run_once(&campaign.id)
        .await
        .unwrap()
        .expect("a rebuild must run");
    assert_eq!(status.rebuild_type, RebuildType::Full);
    assert_eq!(status.status, RebuildState::Completed);

    let changelog = ChangelogStore::new(pool.clone());
    assert!(
        changelog.unapplied(&campaign.id).await.unwrap().is_empty(),
        "all snapshotted entries are applied"
    );
    assert_eq!(accumulator.get(&campaign.id), 0.0, "accumulator resets");

    // Telemetry landed for the completed rebuild.
    let telemetry = RebuildStore::new(pool.clone())
        .list_telemetry(&campaign.id)
        .await
        .unwrap();
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0].rebuild_id, status.id);
}

#[tokio::test]
async fn small_affected_set_runs_partial() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let campaigns = CampaignStore::new(pool.clone());
    let campaign = campaigns
        .create(&format!("owner-{}", Uuid::new_v4()), "Partial", "")
        .await
        .unwrap();

    let accumulator = Arc::new(ImpactAccumulator::new());
    let recorder = ChangelogRecorder::new(
        ChangelogStore::new(pool.clone()),
        None,
        accumulator.clone(),
        5.0,
        None,
    );
    recorder
        .record(&campaign.id, None, payload(2, 0, 0))
        .await
        .unwrap();

    let orch = orchestrator(
        &pool,
        accumulator,
        OrchestratorConfig {
            partial_max_entities: 25,
            summaries_enabled: false,
            retry_delays: vec![Duration::ZERO],
            ..Default::default()
        },
    );

    let status = orch.run_once(&campaign.id).await.unwrap().unwrap();
    assert_eq!(status.rebuild_type, RebuildType::Partial);
    assert_eq!(status.status, RebuildState::Completed);
}

#[tokio::test]
async fn rebuild_with_nothing_unapplied_is_a_noop() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let campaigns = CampaignStore::new(pool.clone());
    let campaign = campaigns
        .create(&format!("owner-{}", Uuid::new_v4()), "Idle", "")
        .await
        .unwrap();

    let orch = orchestrator(
        &pool,
        Arc::new(ImpactAccumulator::new()),
        OrchestratorConfig::default(),
    );
    assert!(orch.run_once(&campaign.id).await.unwrap().is_none());
}
