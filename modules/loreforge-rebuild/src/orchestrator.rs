use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use loreforge_common::{
    LoreforgeError, Notification, NotificationType, RebuildStatus, RebuildTelemetry, RebuildType,
};
use loreforge_graph::{CommunityDetector, CommunitySummarizer, ImportanceCalculator};
use loreforge_hub::HubRegistry;
use loreforge_store::{CampaignStore, ChangelogStore, RebuildStore};

use crate::accumulator::ImpactAccumulator;

/// A nudge that a campaign's accumulated impact crossed the threshold.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    pub campaign_id: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub impact_threshold: f64,
    /// A rebuild touching at most this many distinct entities runs partial.
    pub partial_max_entities: usize,
    pub summaries_enabled: bool,
    /// Backoff before retrying a failed rebuild; one slot per retry.
    pub retry_delays: Vec<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            impact_threshold: 5.0,
            partial_max_entities: 25,
            summaries_enabled: true,
            retry_delays: vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ],
        }
    }
}

/// Consumes impact events and executes the rebuild pipeline: communities,
/// summaries (async), importance, changelog application, telemetry, and
/// user-visible notifications at every transition.
pub struct RebuildOrchestrator {
    campaigns: CampaignStore,
    changelog: ChangelogStore,
    rebuilds: RebuildStore,
    detector: CommunityDetector,
    importance: ImportanceCalculator,
    summarizer: Option<Arc<CommunitySummarizer>>,
    hubs: Arc<HubRegistry>,
    accumulator: Arc<ImpactAccumulator>,
    config: OrchestratorConfig,
}

impl RebuildOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: CampaignStore,
        changelog: ChangelogStore,
        rebuilds: RebuildStore,
        detector: CommunityDetector,
        importance: ImportanceCalculator,
        summarizer: Option<Arc<CommunitySummarizer>>,
        hubs: Arc<HubRegistry>,
        accumulator: Arc<ImpactAccumulator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            campaigns,
            changelog,
            rebuilds,
            detector,
            importance,
            summarizer,
            hubs,
            accumulator,
            config,
        }
    }

    /// Restore the in-memory accumulator from persisted unapplied impact,
    /// after a process restart.
    pub async fn rehydrate_campaign(&self, campaign_id: &str) -> Result<(), LoreforgeError> {
        let sum = self
            .changelog
            .unapplied_impact(campaign_id)
            .await
            .map_err(transient)?;
        self.accumulator.set(campaign_id, sum);
        Ok(())
    }

    /// Serve rebuild requests until the channel closes. Requests for a
    /// campaign whose accumulator has already been drained are no-ops.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RebuildRequest>) {
        while let Some(request) = rx.recv().await {
            if let Err(e) = self.run_once(&request.campaign_id).await {
                error!(campaign = %request.campaign_id, error = %e, "rebuild dead-lettered");
            }
        }
    }

    /// Decide scope, then execute with retry. Returns the final status row,
    /// or None when there was nothing to apply.
    pub async fn run_once(
        &self,
        campaign_id: &str,
    ) -> Result<Option<RebuildStatus>, LoreforgeError> {
        let unapplied = self.changelog.unapplied(campaign_id).await.map_err(transient)?;
        if unapplied.is_empty() {
            return Ok(None);
        }

        let mut affected: Vec<String> = unapplied
            .iter()
            .flat_map(|e| e.payload.affected_entity_ids())
            .collect();
        affected.sort();
        affected.dedup();

        let rebuild_type = if affected.len() <= self.config.partial_max_entities {
            RebuildType::Partial
        } else {
            RebuildType::Full
        };
        let snapshot: Vec<String> = unapplied.iter().map(|e| e.id.clone()).collect();

        let status = self
            .rebuilds
            .create(campaign_id, rebuild_type)
            .await
            .map_err(transient)?;

        let max_attempts = self.config.retry_delays.len().max(1);
        let mut last_error: Option<LoreforgeError> = None;
        for attempt in 0..max_attempts {
            match self
                .attempt(&status.id, campaign_id, rebuild_type, &affected, &snapshot)
                .await
            {
                Ok(()) => {
                    let final_status = self
                        .rebuilds
                        .get(&status.id)
                        .await
                        .map_err(transient)?
                        .ok_or_else(|| {
                            LoreforgeError::Fatal(format!("rebuild status {} vanished", status.id))
                        })?;
                    return Ok(Some(final_status));
                }
                Err(e) => {
                    warn!(
                        campaign = campaign_id,
                        rebuild = %status.id,
                        attempt = attempt + 1,
                        error = %e,
                        "rebuild attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.config.retry_delays[attempt]).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LoreforgeError::Fatal("rebuild failed".to_string())))
    }

    async fn attempt(
        &self,
        rebuild_id: &str,
        campaign_id: &str,
        rebuild_type: RebuildType,
        affected: &[String],
        snapshot: &[String],
    ) -> Result<(), LoreforgeError> {
        let started = Instant::now();
        let previous_completed = self
            .rebuilds
            .last_completed_at(campaign_id)
            .await
            .map_err(transient)?;

        self.rebuilds
            .mark_in_progress(rebuild_id)
            .await
            .map_err(transient)?;
        self.notify(
            campaign_id,
            Notification::new(NotificationType::RebuildStarted, "Rebuild started", "")
                .with_data(serde_json::json!({
                    "campaignId": campaign_id,
                    "rebuildId": rebuild_id,
                    "rebuildType": rebuild_type.to_string(),
                })),
        )
        .await;

        let result = self
            .pipeline(campaign_id, rebuild_type, affected, snapshot)
            .await;

        match result {
            Ok((community_count, entity_count)) => {
                self.rebuilds
                    .mark_completed(rebuild_id)
                    .await
                    .map_err(transient)?;
                self.accumulator.reset(campaign_id);

                let telemetry = RebuildTelemetry {
                    rebuild_id: rebuild_id.to_string(),
                    campaign_id: campaign_id.to_string(),
                    duration_ms: started.elapsed().as_millis() as i64,
                    community_count,
                    entity_count,
                    secs_since_last: previous_completed
                        .map(|t| (Utc::now() - t).num_seconds()),
                    created_at: Utc::now(),
                };
                if let Err(e) = self.rebuilds.record_telemetry(&telemetry).await {
                    warn!(campaign = campaign_id, error = %e, "failed to record rebuild telemetry");
                }

                info!(
                    campaign = campaign_id,
                    rebuild = rebuild_id,
                    communities = community_count,
                    duration_ms = telemetry.duration_ms,
                    "rebuild completed"
                );
                self.notify(
                    campaign_id,
                    Notification::new(NotificationType::RebuildCompleted, "Rebuild complete", "")
                        .with_data(serde_json::json!({
                            "campaignId": campaign_id,
                            "rebuildId": rebuild_id,
                            "communities": community_count,
                            "durationMs": telemetry.duration_ms,
                        })),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                // Changelog entries stay unapplied; the accumulator keeps its
                // sum so a later nudge can try again.
                self.rebuilds
                    .mark_failed(rebuild_id, &e.to_string())
                    .await
                    .map_err(transient)?;
                self.notify(
                    campaign_id,
                    Notification::new(NotificationType::RebuildFailed, "Rebuild failed", e.to_string())
                        .with_data(serde_json::json!({
                            "campaignId": campaign_id,
                            "rebuildId": rebuild_id,
                        })),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn pipeline(
        &self,
        campaign_id: &str,
        rebuild_type: RebuildType,
        affected: &[String],
        snapshot: &[String],
    ) -> Result<(i64, i64), LoreforgeError> {
        let communities = match rebuild_type {
            RebuildType::Full => self.detector.rebuild_full(campaign_id).await?,
            RebuildType::Partial => {
                self.detector
                    .rebuild_incremental(campaign_id, affected)
                    .await?
            }
        };

        // Summaries must never block the rebuild result.
        if self.config.summaries_enabled {
            if let Some(summarizer) = &self.summarizer {
                let summarizer = summarizer.clone();
                let batch = communities.clone();
                tokio::spawn(async move {
                    if let Err(e) = summarizer.generate_for_communities(&batch).await {
                        warn!(error = %e, "community summary batch failed");
                    }
                });
            }
        }

        let importance_rows = self.importance.recalculate_campaign(campaign_id).await?;

        self.changelog
            .mark_applied(snapshot)
            .await
            .map_err(transient)?;

        Ok((communities.len() as i64, importance_rows.len() as i64))
    }

    /// Notifications are best-effort; a hub failure never fails a rebuild.
    async fn notify(&self, campaign_id: &str, notification: Notification) {
        let owner = match self.campaigns.get(campaign_id).await {
            Ok(Some(campaign)) => campaign.owner_id,
            Ok(None) => return,
            Err(e) => {
                warn!(campaign = campaign_id, error = %e, "owner lookup failed for notification");
                return;
            }
        };
        let hub = self.hubs.get_or_spawn(&owner).await;
        if let Err(e) = hub.publish(notification).await {
            warn!(campaign = campaign_id, error = %e, "rebuild notification failed");
        }
    }
}

fn transient(e: anyhow::Error) -> LoreforgeError {
    LoreforgeError::Transient(e.to_string())
}
