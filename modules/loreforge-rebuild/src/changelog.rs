use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use loreforge_common::{
    entity_id, ChangelogEntry, ChangelogPayload, LoreforgeError,
};
use loreforge_store::{ChangelogStore, ImportanceStore};

use crate::accumulator::ImpactAccumulator;
use crate::orchestrator::RebuildRequest;

/// Per-update weights for impact scoring.
#[derive(Debug, Clone, Copy)]
pub struct ImpactWeights {
    pub entity_deleted: f64,
    pub entity_modified: f64,
    pub relationship_changed: f64,
    pub new_entity: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            entity_deleted: 3.0,
            entity_modified: 1.5,
            relationship_changed: 1.0,
            new_entity: 1.2,
        }
    }
}

/// Importance assumed for entities with no importance row yet.
const DEFAULT_IMPORTANCE: f64 = 50.0;

/// Prefix every entity id in the payload with the campaign id, so overlay
/// reads and graph joins never see unscoped ids.
pub fn normalize_payload(campaign_id: &str, mut payload: ChangelogPayload) -> ChangelogPayload {
    for update in &mut payload.entity_updates {
        update.entity_id = entity_id(campaign_id, &update.entity_id);
    }
    for update in &mut payload.relationship_updates {
        update.from_entity_id = entity_id(campaign_id, &update.from_entity_id);
        update.to_entity_id = entity_id(campaign_id, &update.to_entity_id);
    }
    for new in &mut payload.new_entities {
        new.entity_id = entity_id(campaign_id, &new.entity_id);
    }
    payload
}

pub fn validate_payload(payload: &ChangelogPayload) -> Result<(), LoreforgeError> {
    if payload.timestamp <= 0 {
        return Err(LoreforgeError::Validation(
            "changelog payload requires a positive timestamp".to_string(),
        ));
    }
    Ok(())
}

/// Importance-weighted impact: entity updates contribute
/// `weight × importance/100`; relationship updates contribute
/// `weight × (1 + 0.5 × avg_endpoint_importance/100)`; new entities, which
/// cannot have importance yet, contribute their flat weight.
pub fn impact_score_weighted(
    payload: &ChangelogPayload,
    weights: &ImpactWeights,
    importance: &HashMap<String, f64>,
) -> f64 {
    let lookup = |id: &str| importance.get(id).copied().unwrap_or(DEFAULT_IMPORTANCE);

    let entity_impact: f64 = payload
        .entity_updates
        .iter()
        .map(|u| {
            let weight = match u.change {
                loreforge_common::EntityChange::Deleted => weights.entity_deleted,
                loreforge_common::EntityChange::Modified => weights.entity_modified,
            };
            weight * lookup(&u.entity_id) / 100.0
        })
        .sum();

    let relationship_impact: f64 = payload
        .relationship_updates
        .iter()
        .map(|u| {
            let avg = (lookup(&u.from_entity_id) + lookup(&u.to_entity_id)) / 2.0;
            weights.relationship_changed * (1.0 + 0.5 * avg / 100.0)
        })
        .sum();

    let new_entity_impact = weights.new_entity * payload.new_entities.len() as f64;

    entity_impact + relationship_impact + new_entity_impact
}

/// Flat fallback when no importance data is available:
/// `1·|entity_updates| + 1.5·|relationship_updates| + 1.2·|new_entities|`.
pub fn impact_score_flat(payload: &ChangelogPayload) -> f64 {
    payload.entity_updates.len() as f64
        + 1.5 * payload.relationship_updates.len() as f64
        + 1.2 * payload.new_entities.len() as f64
}

/// Records changelog entries with their impact, feeds the accumulator, and
/// nudges the orchestrator when a campaign crosses the rebuild threshold.
#[derive(Clone)]
pub struct ChangelogRecorder {
    changelog: ChangelogStore,
    importance: Option<ImportanceStore>,
    accumulator: Arc<ImpactAccumulator>,
    weights: ImpactWeights,
    impact_threshold: f64,
    rebuild_tx: Option<mpsc::Sender<RebuildRequest>>,
}

impl ChangelogRecorder {
    pub fn new(
        changelog: ChangelogStore,
        importance: Option<ImportanceStore>,
        accumulator: Arc<ImpactAccumulator>,
        impact_threshold: f64,
        rebuild_tx: Option<mpsc::Sender<RebuildRequest>>,
    ) -> Self {
        Self {
            changelog,
            importance,
            accumulator,
            weights: ImpactWeights::default(),
            impact_threshold,
            rebuild_tx,
        }
    }

    pub async fn record(
        &self,
        campaign_id: &str,
        campaign_session_id: Option<String>,
        payload: ChangelogPayload,
    ) -> Result<ChangelogEntry, LoreforgeError> {
        let payload = normalize_payload(campaign_id, payload);
        validate_payload(&payload)?;

        let impact_score = match &self.importance {
            Some(store) => {
                let mut importance = HashMap::new();
                for id in payload.affected_entity_ids() {
                    match store.get(campaign_id, &id).await {
                        Ok(Some(row)) => {
                            importance.insert(id, row.importance_score);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(campaign = campaign_id, error = %e, "importance lookup failed, using default");
                        }
                    }
                }
                impact_score_weighted(&payload, &self.weights, &importance)
            }
            None => impact_score_flat(&payload),
        };

        let entry = ChangelogEntry {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            campaign_session_id,
            timestamp: Utc::now(),
            payload,
            impact_score,
            applied_to_graph: false,
        };
        self.changelog
            .append(&entry)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        let sum = self.accumulator.add(campaign_id, impact_score);
        debug!(campaign = campaign_id, impact = impact_score, sum, "changelog recorded");

        if sum >= self.impact_threshold {
            if let Some(tx) = &self.rebuild_tx {
                // Full queue means a rebuild is already pending; dropping the
                // nudge is fine because the sum stays above threshold.
                let _ = tx.try_send(RebuildRequest {
                    campaign_id: campaign_id.to_string(),
                });
            }
        }

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreforge_common::{
        EntityChange, EntityUpdate, NewEntity, RelationshipUpdate,
    };

    fn payload(eu: usize, ru: usize, ne: usize) -> ChangelogPayload {
        ChangelogPayload {
            timestamp: 1_700_000_000_000,
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

    #[test]
    fn normalization_prefixes_unscoped_ids_once() {
        let normalized = normalize_payload("c1", payload(1, 1, 1));
        assert_eq!(normalized.entity_updates[0].entity_id, "c1_e0");
        assert_eq!(normalized.relationship_updates[0].from_entity_id, "c1_e0");
        assert_eq!(normalized.new_entities[0].entity_id, "c1_n0");

        let twice = normalize_payload("c1", normalized);
        assert_eq!(twice.entity_updates[0].entity_id, "c1_e0");
    }

    #[test]
    fn flat_scoring_matches_the_fallback_formula() {
        let p = payload(2, 1, 3);
        assert!((impact_score_flat(&p) - (2.0 + 1.5 + 3.6)).abs() < 1e-9);
    }

    #[test]
    fn weighted_scoring_scales_with_importance() {
        let weights = ImpactWeights::default();
        let mut p = payload(1, 0, 0);
        p.entity_updates[0].change = EntityChange::Deleted;

        let mut importance = HashMap::new();
        importance.insert("e0".to_string(), 100.0);
        assert!((impact_score_weighted(&p, &weights, &importance) - 3.0).abs() < 1e-9);

        importance.insert("e0".to_string(), 10.0);
        assert!((impact_score_weighted(&p, &weights, &importance) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn relationship_updates_use_endpoint_average() {
        let weights = ImpactWeights::default();
        let p = payload(0, 1, 0);
        let mut importance = HashMap::new();
        importance.insert("e0".to_string(), 100.0);
        importance.insert("f0".to_string(), 0.0);
        // avg = 50 → 1.0 × (1 + 0.25) = 1.25
        assert!((impact_score_weighted(&p, &weights, &importance) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn unknown_entities_assume_midrange_importance() {
        let weights = ImpactWeights::default();
        let p = payload(1, 0, 0);
        // 1.5 × 50/100 = 0.75
        assert!(
            (impact_score_weighted(&p, &weights, &HashMap::new()) - 0.75).abs() < 1e-9
        );
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        let mut p = payload(1, 0, 0);
        p.timestamp = 0;
        assert!(matches!(
            validate_payload(&p),
            Err(LoreforgeError::Validation(_))
        ));
    }
}
