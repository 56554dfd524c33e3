use std::collections::VecDeque;

use crate::loader::CampaignGraph;
use crate::normalize_to_100;

/// Brandes betweenness centrality over the directed, unweighted graph.
///
/// For each source: BFS accumulating shortest-path counts σ and predecessor
/// sets, then reverse-order dependency accumulation
/// `δ(v) += Σ_{w: v∈pred(w)} (σ(v)/σ(w))·(1+δ(w))`.
/// Output is per node index, unnormalized.
pub fn betweenness(graph: &CampaignGraph) -> Vec<f64> {
    let n = graph.node_count();
    let mut centrality = vec![0.0; n];

    for source in 0..n {
        let mut stack: Vec<usize> = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];

        sigma[source] = 1.0;
        dist[source] = 0;

        let mut queue = VecDeque::new();
        queue.push_back(source);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &graph.out[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += (sigma[v] / sigma[w]) * (1.0 + delta[w]);
            }
            if w != source {
                centrality[w] += delta[w];
            }
        }
    }

    centrality
}

/// Betweenness min-max normalized to [0, 100], keyed by node index.
pub fn betweenness_normalized(graph: &CampaignGraph) -> Vec<f64> {
    let mut scores = betweenness(graph);
    normalize_to_100(&mut scores);
    scores
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

    /// Path a→b→c, both directions: b sits on every a↔c shortest path.
    #[test]
    fn bridge_node_has_highest_centrality() {
        let g = graph(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "a"), ("b", "c"), ("c", "b")],
        );
        let bc = betweenness(&g);
        let b = bc[g.index["b"]];
        assert!(b > bc[g.index["a"]]);
        assert!(b > bc[g.index["c"]]);
        // b carries exactly the a→c and c→a paths.
        assert!((b - 2.0).abs() < 1e-9);
    }

    #[test]
    fn complete_graph_has_zero_centrality() {
        let g = graph(
            &["a", "b", "c"],
            &[
                ("a", "b"),
                ("b", "a"),
                ("b", "c"),
                ("c", "b"),
                ("a", "c"),
                ("c", "a"),
            ],
        );
        assert!(betweenness(&g).iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn split_shortest_paths_share_dependency() {
        // Two equal-length paths s→a→t and s→b→t; a and b split the credit.
        let g = graph(
            &["s", "a", "b", "t"],
            &[("s", "a"), ("s", "b"), ("a", "t"), ("b", "t")],
        );
        let bc = betweenness(&g);
        assert!((bc[g.index["a"]] - 0.5).abs() < 1e-9);
        assert!((bc[g.index["b"]] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn deterministic_across_runs() {
        let g = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")],
        );
        assert_eq!(betweenness(&g), betweenness(&g));
    }

    #[test]
    fn normalized_is_bounded() {
        let g = graph(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "a"), ("b", "c"), ("c", "b")],
        );
        let bc = betweenness_normalized(&g);
        assert!(bc.iter().all(|v| (0.0..=100.0).contains(v)));
    }
}
