use std::collections::HashMap;

use tracing::info;

use loreforge_common::{
    combined_importance, Community, EntityImportance, EntityMetadata, LoreforgeError,
};
use loreforge_store::{CommunityStore, EntityStore, ImportanceStore};

use crate::betweenness::betweenness_normalized;
use crate::loader::GraphLoader;
use crate::normalize_to_100;
use crate::pagerank::pagerank_normalized;

/// Hierarchy score per entity: 50 for entities in no community, otherwise the
/// mean of their community levels min-max normalized to [0, 100] across the
/// campaign's community members.
pub fn hierarchy_scores(
    entity_ids: &[String],
    communities: &[Community],
) -> HashMap<String, f64> {
    let mut levels: HashMap<&str, Vec<i32>> = HashMap::new();
    for community in communities {
        for id in &community.entity_ids {
            levels.entry(id.as_str()).or_default().push(community.level);
        }
    }

    let mut member_ids: Vec<&str> = levels.keys().copied().collect();
    member_ids.sort_unstable();
    let mut averages: Vec<f64> = member_ids
        .iter()
        .map(|id| {
            let ls = &levels[id];
            ls.iter().sum::<i32>() as f64 / ls.len() as f64
        })
        .collect();
    normalize_to_100(&mut averages);

    let normalized: HashMap<&str, f64> = member_ids.iter().copied().zip(averages).collect();

    entity_ids
        .iter()
        .map(|id| {
            let score = normalized.get(id.as_str()).copied().unwrap_or(50.0);
            (id.clone(), score)
        })
        .collect()
}

/// The score clients see: a manual override in entity metadata replaces the
/// computed value on read.
pub fn effective_importance(metadata: &EntityMetadata, computed: f64) -> f64 {
    metadata
        .importance_override
        .map(|o| o.score())
        .unwrap_or(computed)
}

/// Batch importance recalculation: one graph load, PageRank plus betweenness
/// plus hierarchy, combined and persisted per entity.
#[derive(Clone)]
pub struct ImportanceCalculator {
    loader: GraphLoader,
    entities: EntityStore,
    communities: CommunityStore,
    importance: ImportanceStore,
}

impl ImportanceCalculator {
    pub fn new(
        loader: GraphLoader,
        entities: EntityStore,
        communities: CommunityStore,
        importance: ImportanceStore,
    ) -> Self {
        Self {
            loader,
            entities,
            communities,
            importance,
        }
    }

    pub async fn recalculate_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<EntityImportance>, LoreforgeError> {
        let graph = self.loader.load(campaign_id, false).await?;
        if graph.node_count() == 0 {
            return Ok(Vec::new());
        }

        let pagerank = pagerank_normalized(&graph);
        let betweenness = betweenness_normalized(&graph);
        let communities = self
            .communities
            .list_for_campaign(campaign_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        let hierarchy = hierarchy_scores(&graph.nodes, &communities);

        let rows: Vec<EntityImportance> = graph
            .nodes
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let h = hierarchy.get(id).copied().unwrap_or(50.0);
                EntityImportance {
                    entity_id: id.clone(),
                    campaign_id: campaign_id.to_string(),
                    pagerank: pagerank[i],
                    betweenness_centrality: betweenness[i],
                    hierarchy_level: h,
                    importance_score: combined_importance(pagerank[i], betweenness[i], h),
                }
            })
            .collect();

        self.importance
            .upsert_batch(&rows)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        // Mirror the computed score into entity metadata for cheap reads.
        // Manual overrides are read-time substitutions and are untouched here.
        for row in &rows {
            if let Some(entity) = self
                .entities
                .get(&row.entity_id)
                .await
                .map_err(|e| LoreforgeError::Transient(e.to_string()))?
            {
                let mut metadata = entity.metadata.clone();
                metadata.importance_score = Some(row.importance_score);
                self.entities
                    .set_metadata(&row.entity_id, &metadata)
                    .await
                    .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
            }
        }

        info!(
            campaign = campaign_id,
            entities = rows.len(),
            "importance recalculated"
        );
        Ok(rows)
    }
}
