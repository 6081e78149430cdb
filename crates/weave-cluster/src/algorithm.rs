//! Community detection strategies.
//!
//! A [`ClusteringAlgorithm`] maps every node of a [`CouplingGraph`] to a
//! community number. Numbers are contiguous from 0 in order of first
//! appearance by node index; the engine turns them into ordered cluster ids.

use std::collections::BTreeMap;

use petgraph::unionfind::UnionFind;
use weave_core::{AlgorithmKind, WeaveError};

use crate::graph::CouplingGraph;

/// Relative gain below which a Louvain move is not worth making.
const MIN_GAIN: f64 = 1e-12;

/// Partition of graph nodes into communities.
pub trait ClusteringAlgorithm {
    fn kind(&self) -> AlgorithmKind;

    /// Community number of every node, indexed like the graph's nodes.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::InvalidParameter`] for unusable parameters.
    fn run(&self, graph: &CouplingGraph) -> Result<Vec<usize>, WeaveError>;

    /// Whether the modularity of the result is meaningful for this strategy.
    fn reports_modularity(&self) -> bool {
        true
    }
}

/// Strategy for `kind` with the given Louvain resolution.
pub fn algorithm_for(kind: AlgorithmKind, resolution: f64) -> Box<dyn ClusteringAlgorithm> {
    match kind {
        AlgorithmKind::ConnectedComponents => Box::new(ConnectedComponents),
        AlgorithmKind::Louvain => Box::new(Louvain::new(resolution)),
    }
}

/// Connected components of the coupling graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectedComponents;

impl ClusteringAlgorithm for ConnectedComponents {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::ConnectedComponents
    }

    fn run(&self, graph: &CouplingGraph) -> Result<Vec<usize>, WeaveError> {
        let mut sets = UnionFind::<usize>::new(graph.node_count());
        for (a, b, _) in graph.edges() {
            sets.union(a, b);
        }
        Ok(renumber(&sets.into_labeling()))
    }

    fn reports_modularity(&self) -> bool {
        false
    }
}

/// Weighted multi-level Louvain.
///
/// Nodes are visited in index order, a node only leaves its community for a
/// strictly better one, and ties between candidates go to the lowest
/// community number, so the result only depends on the graph. Higher
/// resolution yields more, smaller communities.
///
/// # Examples
///
/// ```
/// use weave_core::{FileId, WeightColumn};
/// use weave_cluster::algorithm::{ClusteringAlgorithm, Louvain};
/// use weave_cluster::graph::CouplingGraph;
/// use weave_coupling::coupling::CouplingEdge;
///
/// let pairs = [(1, 2), (2, 3), (1, 3), (4, 5), (5, 6), (4, 6), (3, 4)];
/// let edges: Vec<CouplingEdge> = pairs
///     .iter()
///     .map(|&(a, b)| CouplingEdge::new(FileId(a), FileId(b), 3, 3, 3))
///     .collect();
/// let graph = CouplingGraph::build(&edges, WeightColumn::Coupling, 0.0, |_| true);
/// let partition = Louvain::default().run(&graph).unwrap();
/// assert_eq!(partition, vec![0, 0, 0, 1, 1, 1]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Louvain {
    pub resolution: f64,
    /// Aggregation levels before giving up.
    pub max_levels: usize,
    /// Local-moving sweeps per level.
    pub max_sweeps: usize,
}

impl Louvain {
    pub fn new(resolution: f64) -> Self {
        Self {
            resolution,
            ..Self::default()
        }
    }
}

impl Default for Louvain {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_levels: 32,
            max_sweeps: 100,
        }
    }
}

impl ClusteringAlgorithm for Louvain {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Louvain
    }

    fn run(&self, graph: &CouplingGraph) -> Result<Vec<usize>, WeaveError> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(WeaveError::InvalidParameter(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }

        let n = graph.node_count();
        let mut membership: Vec<usize> = (0..n).collect();
        let mut level = Level::from_adjacency(graph.adjacency());

        for _ in 0..self.max_levels {
            let Some(communities) = level.local_moving(self.resolution, self.max_sweeps) else {
                break;
            };
            let communities = renumber(&communities);
            let count = communities.iter().copied().max().map_or(0, |c| c + 1);
            for m in membership.iter_mut() {
                *m = communities[*m];
            }
            if count == level.len() {
                break;
            }
            level = level.aggregate(&communities, count);
        }

        Ok(renumber(&membership))
    }
}

/// One level of the Louvain hierarchy: a weighted graph whose nodes are
/// communities of the level below.
struct Level {
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Weighted degree, self-loops counted twice.
    degree: Vec<f64>,
    /// Twice the total edge weight.
    two_m: f64,
}

impl Level {
    fn from_adjacency(adjacency: Vec<Vec<(usize, f64)>>) -> Self {
        Self::with_self_loops(adjacency, None)
    }

    fn with_self_loops(adjacency: Vec<Vec<(usize, f64)>>, self_loops: Option<Vec<f64>>) -> Self {
        let degree: Vec<f64> = adjacency
            .iter()
            .enumerate()
            .map(|(i, links)| {
                let own = self_loops.as_ref().map_or(0.0, |s| s[i]);
                links.iter().map(|(_, w)| w).sum::<f64>() + 2.0 * own
            })
            .collect();
        let two_m = degree.iter().sum();
        Self {
            adjacency,
            degree,
            two_m,
        }
    }

    fn len(&self) -> usize {
        self.adjacency.len()
    }

    /// Move nodes between communities until no move improves modularity.
    /// Returns `None` when no node moved at all.
    fn local_moving(&self, resolution: f64, max_sweeps: usize) -> Option<Vec<usize>> {
        if self.two_m <= 0.0 {
            return None;
        }
        let n = self.len();
        let mut community: Vec<usize> = (0..n).collect();
        let mut total: Vec<f64> = self.degree.clone();
        let mut moved_any = false;

        for _ in 0..max_sweeps {
            let mut moved = false;
            for node in 0..n {
                let current = community[node];
                let k = self.degree[node];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(neighbor, weight) in &self.adjacency[node] {
                    if neighbor != node {
                        *links.entry(community[neighbor]).or_default() += weight;
                    }
                }

                total[current] -= k;
                let gain = |c: usize, k_in: f64| k_in - resolution * total[c] * k / self.two_m;

                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&candidate, &k_in) in &links {
                    let g = gain(candidate, k_in);
                    if g > best_gain + MIN_GAIN {
                        best = candidate;
                        best_gain = g;
                    }
                }
                total[best] += k;

                if best != current {
                    community[node] = best;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
            moved_any = true;
        }

        moved_any.then_some(community)
    }

    /// Collapse each community into a single node.
    fn aggregate(&self, communities: &[usize], count: usize) -> Level {
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];

        for (node, neighbors) in self.adjacency.iter().enumerate() {
            let cu = communities[node];
            for &(neighbor, weight) in neighbors {
                let cv = communities[neighbor];
                if cu == cv {
                    // Every internal edge is seen from both ends.
                    self_loops[cu] += weight / 2.0;
                } else {
                    *links[cu].entry(cv).or_default() += weight;
                }
            }
        }
        // Self-loops of this level stay inside their community.
        for (node, &k) in self.degree.iter().enumerate() {
            let external: f64 = self.adjacency[node].iter().map(|(_, w)| w).sum();
            self_loops[communities[node]] += (k - external) / 2.0;
        }

        let adjacency = links
            .into_iter()
            .map(|m| m.into_iter().collect())
            .collect();
        Level::with_self_loops(adjacency, Some(self_loops))
    }
}

/// Relabel communities to `0..k` in order of first appearance.
fn renumber(labels: &[usize]) -> Vec<usize> {
    let mut mapping: BTreeMap<usize, usize> = BTreeMap::new();
    labels
        .iter()
        .map(|&label| {
            let next = mapping.len();
            *mapping.entry(label).or_insert(next)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::{FileId, WeightColumn};
    use weave_coupling::coupling::CouplingEdge;

    fn graph(pairs: &[(u64, u64)]) -> CouplingGraph {
        let edges: Vec<CouplingEdge> = pairs
            .iter()
            .map(|&(a, b)| CouplingEdge::new(FileId(a), FileId(b), 3, 3, 3))
            .collect();
        CouplingGraph::build(&edges, WeightColumn::Coupling, 0.0, |_| true)
    }

    fn clique(offset: u64, size: u64) -> Vec<(u64, u64)> {
        let mut pairs = Vec::new();
        for a in 0..size {
            for b in a + 1..size {
                pairs.push((offset + a, offset + b));
            }
        }
        pairs
    }

    #[test]
    fn components_of_disjoint_pairs() {
        let g = graph(&[(1, 2), (3, 4), (2, 5)]);
        let partition = ConnectedComponents.run(&g).unwrap();
        // nodes: 1, 2, 3, 4, 5
        assert_eq!(partition, vec![0, 0, 1, 1, 0]);
    }

    #[test]
    fn louvain_splits_bridged_cliques() {
        let mut pairs = clique(0, 5);
        pairs.extend(clique(10, 5));
        pairs.push((4, 10));
        let g = graph(&pairs);

        let partition = Louvain::default().run(&g).unwrap();
        assert_eq!(&partition[..5], &[0; 5]);
        assert_eq!(&partition[5..], &[1; 5]);
        assert!(g.modularity(&partition, 1.0) > 0.4);

        let components = ConnectedComponents.run(&g).unwrap();
        assert!(components.iter().all(|&c| c == 0));
    }

    #[test]
    fn louvain_merges_ring_of_cliques_hierarchically() {
        let mut pairs = Vec::new();
        for i in 0..6 {
            pairs.extend(clique(i * 10, 4));
            pairs.push((i * 10, ((i + 1) % 6) * 10 + 1));
        }
        let g = graph(&pairs);
        let partition = Louvain::default().run(&g).unwrap();
        let communities = partition.iter().copied().max().unwrap() + 1;
        assert!(communities >= 2);
        let q = g.modularity(&partition, 1.0);
        let singletons: Vec<usize> = (0..g.node_count()).collect();
        assert!(q > g.modularity(&singletons, 1.0));
    }

    #[test]
    fn louvain_is_deterministic() {
        let mut pairs = clique(0, 4);
        pairs.extend(clique(20, 4));
        pairs.extend([(0, 20), (1, 21), (3, 40), (40, 41)]);
        let g = graph(&pairs);
        let first = Louvain::default().run(&g).unwrap();
        for _ in 0..5 {
            assert_eq!(Louvain::default().run(&g).unwrap(), first);
        }
    }

    #[test]
    fn higher_resolution_gives_more_communities() {
        let mut pairs = Vec::new();
        for i in 0..4 {
            pairs.extend(clique(i * 10, 3));
            pairs.push((i * 10, ((i + 1) % 4) * 10));
        }
        let g = graph(&pairs);
        let count = |r: f64| Louvain::new(r).run(&g).unwrap().into_iter().max().unwrap() + 1;
        assert!(count(0.1) < count(5.0));
    }

    #[test]
    fn louvain_rejects_non_positive_resolution() {
        let g = graph(&[(1, 2)]);
        let err = Louvain::new(0.0).run(&g).unwrap_err();
        assert!(matches!(err, WeaveError::InvalidParameter(_)));
    }

    #[test]
    fn empty_graph_has_empty_partition() {
        let g = graph(&[]);
        assert!(Louvain::default().run(&g).unwrap().is_empty());
        assert!(ConnectedComponents.run(&g).unwrap().is_empty());
    }

    #[test]
    fn renumber_uses_first_appearance() {
        assert_eq!(renumber(&[7, 7, 3, 9, 3]), vec![0, 0, 1, 2, 1]);
    }
}
