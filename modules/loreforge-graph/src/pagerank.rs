use crate::loader::CampaignGraph;
use crate::normalize_to_100;

pub const DAMPING: f64 = 0.85;
pub const MAX_ITERATIONS: usize = 100;
pub const TOLERANCE: f64 = 1e-4;

/// Standard power iteration:
/// `PR(n) = (1−d)/N + d · Σ_{m∈in(n)} PR(m)/outdeg(m)`.
///
/// Dangling nodes contribute nothing; the `(1−d)/N` term keeps them
/// reachable. Converges when the largest per-node delta drops below the
/// tolerance, else stops at the iteration cap. Output is per node index,
/// unnormalized (sums to ≈ 1 on graphs without dangling nodes).
pub fn pagerank(graph: &CampaignGraph) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let base = (1.0 - DAMPING) / n as f64;
    let mut ranks = vec![1.0 / n as f64; n];
    let mut next = vec![0.0; n];

    for _ in 0..MAX_ITERATIONS {
        for (node, slot) in next.iter_mut().enumerate() {
            let received: f64 = graph.incoming[node]
                .iter()
                .map(|&m| ranks[m] / graph.out[m].len() as f64)
                .sum();
            *slot = base + DAMPING * received;
        }

        let max_delta = ranks
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);

        std::mem::swap(&mut ranks, &mut next);

        if max_delta < TOLERANCE {
            break;
        }
    }

    ranks
}

/// PageRank min-max normalized to [0, 100], keyed by node index.
pub fn pagerank_normalized(graph: &CampaignGraph) -> Vec<f64> {
    let mut ranks = pagerank(graph);
    normalize_to_100(&mut ranks);
    ranks
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

    /// Triangle plus a detached pair, all edges bidirectional.
    fn triangle_and_pair() -> CampaignGraph {
        graph(
            &["a", "b", "c", "d", "e"],
            &[
                ("a", "b"),
                ("b", "a"),
                ("b", "c"),
                ("c", "b"),
                ("c", "a"),
                ("a", "c"),
                ("d", "e"),
                ("e", "d"),
            ],
        )
    }

    #[test]
    fn sums_to_one_without_dangling_nodes() {
        let g = triangle_and_pair();
        let pr = pagerank(&g);
        let sum: f64 = pr.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn symmetric_nodes_get_equal_rank() {
        let g = triangle_and_pair();
        let pr = pagerank(&g);
        let a = pr[g.index["a"]];
        let b = pr[g.index["b"]];
        let c = pr[g.index["c"]];
        assert!((a - b).abs() < 1e-9 && (b - c).abs() < 1e-9);
    }

    #[test]
    fn deterministic_across_runs() {
        let g = triangle_and_pair();
        assert_eq!(pagerank(&g), pagerank(&g));
    }

    #[test]
    fn hub_outranks_leaves() {
        // star: leaves all point at the hub, hub points back at one leaf
        let g = graph(
            &["hub", "l1", "l2", "l3"],
            &[("l1", "hub"), ("l2", "hub"), ("l3", "hub"), ("hub", "l1")],
        );
        let pr = pagerank(&g);
        let hub = pr[g.index["hub"]];
        for leaf in ["l1", "l2", "l3"] {
            assert!(hub > pr[g.index[leaf]]);
        }
    }

    #[test]
    fn empty_graph_yields_empty_ranks() {
        let g = graph(&[], &[]);
        assert!(pagerank(&g).is_empty());
    }

    #[test]
    fn normalized_is_bounded() {
        let g = graph(
            &["hub", "l1", "l2"],
            &[("l1", "hub"), ("l2", "hub"), ("hub", "l1")],
        );
        let pr = pagerank_normalized(&g);
        assert!(pr.iter().all(|v| (0.0..=100.0).contains(v)));
        assert!(pr.iter().any(|v| *v == 100.0));
        assert!(pr.iter().any(|v| *v == 0.0));
    }
}
