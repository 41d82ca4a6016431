// gatewarden/src/cluster/community.rs
//
// Community detection over the similarity graph. Connected components seed
// the communities; weighted label propagation then refines them for up to
// max_iterations passes (each node adopts the label carrying the greatest
// summed edge weight among its neighbors). Deterministic: nodes are visited
// in index order and label ties break low.

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

pub struct SimilarityGraph {
    graph: UnGraph<usize, f64>,
    nodes: Vec<NodeIndex>,
}

impl SimilarityGraph {
    /// Build from a pairwise similarity function, keeping edges at or above
    /// the threshold.
    pub fn build(n: usize, threshold: f64, sim: impl Fn(usize, usize) -> f64) -> Self {
        let mut graph = UnGraph::<usize, f64>::new_undirected();
        let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
        for i in 0..n {
            for j in (i + 1)..n {
                let s = sim(i, j);
                if s >= threshold {
                    graph.add_edge(nodes[i], nodes[j], s);
                }
            }
        }
        Self { graph, nodes }
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Detect communities; returns one Vec of member indices per community,
    /// members sorted ascending, communities ordered by smallest member.
    pub fn communities(&self, max_iterations: usize) -> Vec<Vec<usize>> {
        let n = self.nodes.len();
        if n == 0 {
            return vec![];
        }

        // Seed with connected components.
        let mut labels: Vec<usize> = (0..n).collect();
        {
            let mut visited = vec![false; n];
            for start in 0..n {
                if visited[start] {
                    continue;
                }
                let mut stack = vec![start];
                visited[start] = true;
                while let Some(i) = stack.pop() {
                    labels[i] = start;
                    for edge in self.graph.edges(self.nodes[i]) {
                        let j = self.graph[edge.target()];
                        if !visited[j] {
                            visited[j] = true;
                            stack.push(j);
                        }
                    }
                }
            }
        }

        // Weighted label propagation.
        for _ in 0..max_iterations {
            let mut changed = false;
            for i in 0..n {
                let mut weight_by_label: std::collections::BTreeMap<usize, f64> =
                    std::collections::BTreeMap::new();
                for edge in self.graph.edges(self.nodes[i]) {
                    let j = self.graph[edge.target()];
                    *weight_by_label.entry(labels[j]).or_insert(0.0) += *edge.weight();
                }
                if weight_by_label.is_empty() {
                    continue;
                }
                // BTreeMap iteration is label-ascending, so strict > keeps
                // the lowest label on ties.
                let mut best = (labels[i], f64::NEG_INFINITY);
                for (label, weight) in weight_by_label {
                    if weight > best.1 {
                        best = (label, weight);
                    }
                }
                if best.0 != labels[i] && best.1 > 0.0 {
                    labels[i] = best.0;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut by_label: std::collections::BTreeMap<usize, Vec<usize>> =
            std::collections::BTreeMap::new();
        for (i, &label) in labels.iter().enumerate() {
            by_label.entry(label).or_default().push(i);
        }
        by_label.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_dense_blocks_separate() {
        // 0-1-2 tightly similar, 3-4-5 tightly similar, nothing across.
        let sim = |i: usize, j: usize| {
            let same_block = (i < 3) == (j < 3);
            if same_block { 0.9 } else { 0.1 }
        };
        let g = SimilarityGraph::build(6, 0.7, sim);
        let communities = g.communities(10);
        assert_eq!(communities.len(), 2);
        assert_eq!(communities[0], vec![0, 1, 2]);
        assert_eq!(communities[1], vec![3, 4, 5]);
    }

    #[test]
    fn isolated_nodes_are_singletons() {
        let g = SimilarityGraph::build(3, 0.9, |_, _| 0.0);
        let communities = g.communities(5);
        assert_eq!(communities.len(), 3);
    }

    #[test]
    fn empty_population() {
        let g = SimilarityGraph::build(0, 0.5, |_, _| 0.0);
        assert!(g.communities(5).is_empty());
    }
}
