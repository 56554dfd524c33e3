use std::collections::HashMap;

use tracing::warn;

use loreforge_common::LoreforgeError;
use loreforge_store::EntityStore;

/// Hard limits on graph size. Exceeding either fails before any algorithm
/// runs; the caller must split or prune the campaign.
#[derive(Debug, Clone, Copy)]
pub struct GraphCaps {
    pub max_entities: usize,
    pub max_relationships: usize,
}

impl Default for GraphCaps {
    fn default() -> Self {
        Self {
            max_entities: 50_000,
            max_relationships: 200_000,
        }
    }
}

/// Estimated working-set size in MB for an entity/relationship count.
pub fn estimate_memory_mb(entities: usize, relationships: usize) -> f64 {
    5.0 + 0.00005 * entities as f64 + 0.0001 * relationships as f64
}

const MEMORY_WARN_MB: f64 = 80.0;
const MEMORY_FAIL_MB: f64 = 100.0;

/// Compact projection of one campaign's graph: ids and edges only, never
/// entity content. Node indices are assigned in sorted-id order so every
/// algorithm downstream is deterministic.
#[derive(Debug, Clone)]
pub struct CampaignGraph {
    pub campaign_id: String,
    pub nodes: Vec<String>,
    pub index: HashMap<String, usize>,
    /// Directed edges (from, to), deduplicated.
    pub edges: Vec<(usize, usize)>,
    pub out: Vec<Vec<usize>>,
    pub incoming: Vec<Vec<usize>>,
}

impl CampaignGraph {
    /// Build from raw ids and directed id pairs. Edges touching unknown ids
    /// are dropped; self-loops and duplicates are removed.
    pub fn build(
        campaign_id: impl Into<String>,
        mut entity_ids: Vec<String>,
        edge_ids: &[(String, String)],
    ) -> Self {
        entity_ids.sort();
        entity_ids.dedup();

        let index: HashMap<String, usize> = entity_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges: Vec<(usize, usize)> = edge_ids
            .iter()
            .filter_map(|(from, to)| {
                let f = *index.get(from)?;
                let t = *index.get(to)?;
                (f != t).then_some((f, t))
            })
            .collect();
        edges.sort();
        edges.dedup();

        let n = entity_ids.len();
        let mut out = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        for &(f, t) in &edges {
            out[f].push(t);
            incoming[t].push(f);
        }

        Self {
            campaign_id: campaign_id.into(),
            nodes: entity_ids,
            index,
            edges,
            out,
            incoming,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Undirected neighbor lists (direction collapsed, deduplicated), as
    /// community detection sees the graph.
    pub fn undirected_neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.node_count()];
        for &(f, t) in &self.edges {
            neighbors[f].push(t);
            neighbors[t].push(f);
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        neighbors
    }

    /// The subgraph induced by `keep` (entity ids). Node indices are
    /// reassigned; edge endpoints outside the set are dropped.
    pub fn induced_subgraph(&self, keep: &[String]) -> CampaignGraph {
        let keep_set: std::collections::HashSet<&str> =
            keep.iter().map(|s| s.as_str()).collect();
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .filter(|id| keep_set.contains(id.as_str()))
            .cloned()
            .collect();
        let edges: Vec<(String, String)> = self
            .edges
            .iter()
            .filter_map(|&(f, t)| {
                let from = &self.nodes[f];
                let to = &self.nodes[t];
                (keep_set.contains(from.as_str()) && keep_set.contains(to.as_str()))
                    .then(|| (from.clone(), to.clone()))
            })
            .collect();
        CampaignGraph::build(self.campaign_id.clone(), nodes, &edges)
    }
}

/// Loads the id/edge projection from the store, applying the rejection
/// filters and the memory guardrails.
#[derive(Clone)]
pub struct GraphLoader {
    entities: EntityStore,
    caps: GraphCaps,
}

impl GraphLoader {
    pub fn new(entities: EntityStore, caps: GraphCaps) -> Self {
        Self { entities, caps }
    }

    /// Load the campaign graph. Excludes rejected/ignored entities, excludes
    /// rejected/ignored (and, unless `include_staging`, staging) edges, and
    /// drops edges touching an excluded entity.
    pub async fn load(
        &self,
        campaign_id: &str,
        include_staging_edges: bool,
    ) -> Result<CampaignGraph, LoreforgeError> {
        let entities = self
            .entities
            .list_for_campaign(campaign_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;
        let relationships = self
            .entities
            .list_relationships_for_campaign(campaign_id)
            .await
            .map_err(|e| LoreforgeError::Transient(e.to_string()))?;

        let entity_ids: Vec<String> = entities
            .iter()
            .filter(|e| !e.metadata.is_excluded())
            .map(|e| e.id.clone())
            .collect();

        let edge_ids: Vec<(String, String)> = relationships
            .iter()
            .filter(|r| !r.metadata.is_excluded(include_staging_edges))
            .map(|r| (r.from_entity_id.clone(), r.to_entity_id.clone()))
            .collect();

        check_graph_limits(self.caps, campaign_id, entity_ids.len(), edge_ids.len())?;

        // CampaignGraph::build drops edges touching excluded entities since
        // those ids are absent from the node set.
        Ok(CampaignGraph::build(campaign_id, entity_ids, &edge_ids))
    }
}

/// Enforce the size caps and the memory guardrail before any algorithm runs.
pub fn check_graph_limits(
    caps: GraphCaps,
    campaign_id: &str,
    entities: usize,
    relationships: usize,
) -> Result<(), LoreforgeError> {
    if entities > caps.max_entities {
        return Err(LoreforgeError::ResourceExhausted(format!(
            "campaign {campaign_id} has {entities} entities, cap is {}",
            caps.max_entities
        )));
    }
    if relationships > caps.max_relationships {
        return Err(LoreforgeError::ResourceExhausted(format!(
            "campaign {campaign_id} has {relationships} relationships, cap is {}",
            caps.max_relationships
        )));
    }

    let estimated = estimate_memory_mb(entities, relationships);
    if estimated >= MEMORY_FAIL_MB {
        return Err(LoreforgeError::ResourceExhausted(format!(
            "estimated {estimated:.1} MB for campaign {campaign_id} graph exceeds the {MEMORY_FAIL_MB} MB limit"
        )));
    }
    if estimated >= MEMORY_WARN_MB {
        warn!(
            campaign = campaign_id,
            estimated_mb = estimated,
            "graph memory estimate approaching the limit"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn build_assigns_indices_in_sorted_order() {
        let g = CampaignGraph::build(
            "c1",
            ids(&["c1_b", "c1_a"]),
            &[("c1_a".into(), "c1_b".into())],
        );
        assert_eq!(g.nodes, vec!["c1_a", "c1_b"]);
        assert_eq!(g.edges, vec![(0, 1)]);
        assert_eq!(g.out[0], vec![1]);
        assert_eq!(g.incoming[1], vec![0]);
    }

    #[test]
    fn build_drops_unknown_endpoints_and_self_loops() {
        let g = CampaignGraph::build(
            "c1",
            ids(&["c1_a", "c1_b"]),
            &[
                ("c1_a".into(), "c1_b".into()),
                ("c1_a".into(), "c1_a".into()),
                ("c1_a".into(), "c1_ghost".into()),
            ],
        );
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn induced_subgraph_reindexes() {
        let g = CampaignGraph::build(
            "c1",
            ids(&["c1_a", "c1_b", "c1_c"]),
            &[
                ("c1_a".into(), "c1_b".into()),
                ("c1_b".into(), "c1_c".into()),
            ],
        );
        let sub = g.induced_subgraph(&ids(&["c1_b", "c1_c"]));
        assert_eq!(sub.nodes, vec!["c1_b", "c1_c"]);
        assert_eq!(sub.edges, vec![(0, 1)]);
    }

    #[test]
    fn memory_estimate_matches_formula() {
        assert!((estimate_memory_mb(0, 0) - 5.0).abs() < 1e-9);
        // 50k entities + 200k relationships = 5 + 2.5 + 20 = 27.5 MB
        assert!((estimate_memory_mb(50_000, 200_000) - 27.5).abs() < 1e-9);
    }

    #[test]
    fn memory_estimate_fails_at_100mb() {
        // 1.9M entities alone push the estimate over 100 MB.
        let estimated = estimate_memory_mb(1_900_001, 0);
        assert!(estimated > 100.0);
    }

    #[test]
    fn caps_are_inclusive() {
        let caps = GraphCaps {
            max_entities: 100,
            max_relationships: 100,
        };
        assert!(check_graph_limits(caps, "c1", 100, 100).is_ok());
        assert!(matches!(
            check_graph_limits(caps, "c1", 101, 0),
            Err(LoreforgeError::ResourceExhausted(_))
        ));
        assert!(matches!(
            check_graph_limits(caps, "c1", 0, 101),
            Err(LoreforgeError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn memory_guardrail_fails_before_caps_would_allow() {
        // Caps admit the counts, but the estimate crosses 100 MB.
        let caps = GraphCaps {
            max_entities: usize::MAX,
            max_relationships: usize::MAX,
        };
        assert!(matches!(
            check_graph_limits(caps, "c1", 2_000_000, 0),
            Err(LoreforgeError::ResourceExhausted(_))
        ));
    }
}
