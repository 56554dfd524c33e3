use std::collections::HashMap;

use tracing::info;
use uuid::Uuid;

use loreforge_common::{Community, LoreforgeError};
use loreforge_store::{CommunityStore, SummaryStore};

use crate::leiden::{leiden, LeidenConfig};
use crate::loader::{CampaignGraph, GraphLoader};

/// Community detection parameters.
#[derive(Debug, Clone, Copy)]
pub struct DetectionParams {
    pub leiden: LeidenConfig,
    /// Communities smaller than this are dropped.
    pub min_community_size: usize,
    /// Deepest level emitted is `max_levels - 1` (level 0 is coarsest).
    pub max_levels: i32,
    /// Only communities at least this large are subdivided.
    pub subdivide_min_members: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            leiden: LeidenConfig::default(),
            min_community_size: 2,
            max_levels: 3,
            subdivide_min_members: 4,
        }
    }
}

/// Run multi-level detection over the graph. Level 0 partitions the whole
/// graph; large communities are recursively subdivided on their induced
/// subgraphs, children carrying `parent_community_id` and an incremented
/// level. Sub-level communities under the size floor are dropped.
pub fn build_communities(graph: &CampaignGraph, params: &DetectionParams) -> Vec<Community> {
    let mut result = Vec::new();
    detect_level(graph, params, 0, None, &mut result);
    result
}

fn detect_level(
    graph: &CampaignGraph,
    params: &DetectionParams,
    level: i32,
    parent: Option<String>,
    result: &mut Vec<Community>,
) {
    let labels = leiden(&graph.undirected_neighbors(), &params.leiden);

    let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
    for (node, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(graph.nodes[node].clone());
    }

    let mut member_sets: Vec<Vec<String>> = groups
        .into_values()
        .filter(|members| members.len() >= params.min_community_size)
        .collect();
    member_sets.sort_by(|a, b| a[0].cmp(&b[0]));

    // A level that fails to split its input any further gets no children;
    // re-emitting the parent as its own child would recurse forever.
    if parent.is_some() && member_sets.len() == 1 && member_sets[0].len() == graph.node_count() {
        return;
    }

    for members in member_sets {
        let community = Community {
            id: Uuid::new_v4().to_string(),
            campaign_id: graph.campaign_id.clone(),
            level,
            parent_community_id: parent.clone(),
            metadata: serde_json::json!({ "size": members.len() }),
            entity_ids: members,
        };

        let should_subdivide = community.entity_ids.len() >= params.subdivide_min_members
            && level + 1 < params.max_levels;
        if should_subdivide {
            let subgraph = graph.induced_subgraph(&community.entity_ids);
            detect_level(
                &subgraph,
                params,
                level + 1,
                Some(community.id.clone()),
                result,
            );
        }

        result.push(community);
    }
}

/// Store-backed detector used by the rebuild orchestrator.
#[derive(Clone)]
pub struct CommunityDetector {
    loader: GraphLoader,
    communities: CommunityStore,
    summaries: SummaryStore,
    params: DetectionParams,
}

impl CommunityDetector {
    pub fn new(
        loader: GraphLoader,
        communities: CommunityStore,
        summaries: SummaryStore,
        params: DetectionParams,
    ) -> Self {
        Self {
            loader,
            communities,
            summaries,
            params,
        }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Full rebuild: drop every community (and derived summary) for the
    /// campaign and re-detect multi-level from scratch.
    pub async fn rebuild_full(&self, campaign_id: &str) -> Result<Vec<Community>, LoreforgeError> {
        let graph = self.loader.load(campaign_id, false).await?;
        let communities = build_communities(&graph, &self.params);

        self.summaries
            .delete_for_campaign(campaign_id)
            .await
            .map_err(transient)?;
        self.communities
            .delete_for_campaign(campaign_id)
            .await
            .map_err(transient)?;
        self.communities
            .insert_batch(&communities)
            .await
            .map_err(transient)?;

        info!(
            campaign = campaign_id,
            communities = communities.len(),
            "full community rebuild complete"
        );
        Ok(communities)
    }

    /// Incremental update: every community touching an affected entity is
    /// dissolved and its member union re-detected on the induced subgraph,
    /// with the same parameters as a full run.
    pub async fn rebuild_incremental(
        &self,
        campaign_id: &str,
        affected: &[String],
    ) -> Result<Vec<Community>, LoreforgeError> {
        let touched = self
            .communities
            .find_containing(campaign_id, affected)
            .await
            .map_err(transient)?;
        if touched.is_empty() {
            return self.rebuild_full(campaign_id).await;
        }

        // Dissolving a community orphans its children, so the whole subtree
        // under every touched community goes too. Otherwise a surviving
        // child could duplicate entities against the re-detected partition.
        let all = self
            .communities
            .list_for_campaign(campaign_id)
            .await
            .map_err(transient)?;
        let mut dissolved: std::collections::HashSet<String> =
            touched.iter().map(|c| c.id.clone()).collect();
        loop {
            let before = dissolved.len();
            for community in &all {
                if let Some(parent) = &community.parent_community_id {
                    if dissolved.contains(parent) {
                        dissolved.insert(community.id.clone());
                    }
                }
            }
            if dissolved.len() == before {
                break;
            }
        }
        let touched: Vec<&Community> =
            all.iter().filter(|c| dissolved.contains(&c.id)).collect();

        let mut member_union: Vec<String> = touched
            .iter()
            .flat_map(|c| c.entity_ids.iter().cloned())
            .chain(affected.iter().cloned())
            .collect();
        member_union.sort();
        member_union.dedup();

        let graph = self.loader.load(campaign_id, false).await?;
        let subgraph = graph.induced_subgraph(&member_union);
        let communities = build_communities(&subgraph, &self.params);

        let touched_ids: Vec<String> = touched.iter().map(|c| c.id.clone()).collect();
        self.summaries
            .delete_for_communities(&touched_ids)
            .await
            .map_err(transient)?;
        self.communities
            .delete_by_ids(&touched_ids)
            .await
            .map_err(transient)?;
        self.communities
            .insert_batch(&communities)
            .await
            .map_err(transient)?;

        info!(
            campaign = campaign_id,
            dissolved = touched_ids.len(),
            detected = communities.len(),
            "incremental community update complete"
        );
        Ok(communities)
    }
}

fn transient(e: anyhow::Error) -> LoreforgeError {
    LoreforgeError::Transient(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> CampaignGraph {
        CampaignGraph::build(
            "c1",
            nodes.iter().map(|s| s.to_string()).collect(),
            &edges
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn triangle_and_pair_yield_two_level0_communities() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("d", "e")],
        );
        let communities = build_communities(&g, &DetectionParams::default());

        let level0: Vec<_> = communities.iter().filter(|c| c.level == 0).collect();
        assert_eq!(level0.len(), 2);

        let sizes: Vec<usize> = {
            let mut v: Vec<usize> = level0.iter().map(|c| c.entity_ids.len()).collect();
            v.sort();
            v
        };
        assert_eq!(sizes, vec![2, 3]);
    }

    #[test]
    fn singletons_are_filtered_by_min_size() {
        let g = graph(&["a", "b", "lone"], &[("a", "b")]);
        let communities = build_communities(&g, &DetectionParams::default());
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].entity_ids, vec!["a", "b"]);
    }

    #[test]
    fn partition_at_each_level() {
        // Two triangles joined by one bridge: big enough to subdivide.
        let g = graph(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("d", "e"),
                ("e", "f"),
                ("f", "d"),
                ("c", "d"),
            ],
        );
        let communities = build_communities(&g, &DetectionParams::default());

        // No entity appears twice at any one level.
        let mut per_level: HashMap<i32, Vec<&String>> = HashMap::new();
        for c in &communities {
            per_level.entry(c.level).or_default().extend(&c.entity_ids);
        }
        for (level, ids) in per_level {
            let mut sorted: Vec<&&String> = ids.iter().collect();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), ids.len(), "duplicate entity at level {level}");
        }
    }

    #[test]
    fn children_reference_their_parent() {
        let g = graph(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("d", "e"),
                ("e", "f"),
                ("f", "d"),
                ("c", "d"),
            ],
        );
        let communities = build_communities(&g, &DetectionParams::default());
        let level0_ids: Vec<&String> = communities
            .iter()
            .filter(|c| c.level == 0)
            .map(|c| &c.id)
            .collect();

        for child in communities.iter().filter(|c| c.level > 0) {
            let parent = child
                .parent_community_id
                .as_ref()
                .expect("sub-level community must have a parent");
            assert!(level0_ids.contains(&parent) || communities.iter().any(|c| &c.id == parent));
        }
    }

    #[test]
    fn detection_is_deterministic_with_fixed_seed() {
        let g = graph(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("d", "e")],
        );
        let params = DetectionParams::default();
        let first: Vec<Vec<String>> = build_communities(&g, &params)
            .into_iter()
            .map(|c| c.entity_ids)
            .collect();
        let second: Vec<Vec<String>> = build_communities(&g, &params)
            .into_iter()
            .map(|c| c.entity_ids)
            .collect();
        assert_eq!(first, second);
    }
}
