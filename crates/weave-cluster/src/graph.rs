use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use weave_core::{FileId, WeightColumn};
use weave_coupling::coupling::CouplingEdge;

/// Restricts clustering to files under some folder prefixes.
///
/// An empty filter keeps every file. Path-less files only pass an empty
/// filter.
///
/// # Examples
///
/// ```
/// use weave_cluster::graph::FolderFilter;
///
/// let filter = FolderFilter::new(vec!["src/api/".into()]);
/// assert!(filter.matches(Some("src/api/routes.rs")));
/// assert!(!filter.matches(Some("src/apiary.rs")));
/// assert!(!filter.matches(None));
/// assert!(FolderFilter::default().matches(None));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderFilter {
    prefixes: Vec<String>,
}

impl FolderFilter {
    pub fn new(prefixes: Vec<String>) -> Self {
        let mut prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty() && p != ".")
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn matches(&self, path: Option<&str>) -> bool {
        if self.prefixes.is_empty() {
            return true;
        }
        let Some(path) = path else {
            return false;
        };
        self.prefixes.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// Undirected, weighted coupling graph.
///
/// Only files with at least one surviving edge are nodes. Nodes are inserted
/// in file-id order and edges in canonical pair order, so node indices are
/// stable for identical input.
#[derive(Debug, Clone)]
pub struct CouplingGraph {
    graph: UnGraph<FileId, f64>,
    index: BTreeMap<FileId, NodeIndex>,
    /// Coupling of each surviving edge, keyed by canonical pair.
    coupling: BTreeMap<(FileId, FileId), f64>,
}

impl CouplingGraph {
    /// Build the graph from the edges whose `column` value reaches
    /// `min_weight` and whose endpoints both satisfy `keep`.
    ///
    /// # Examples
    ///
    /// ```
    /// use weave_core::{FileId, WeightColumn};
    /// use weave_cluster::graph::CouplingGraph;
    /// use weave_coupling::coupling::CouplingEdge;
    ///
    /// let edges = vec![
    ///     CouplingEdge::new(FileId(1), FileId(2), 5, 5, 5),
    ///     CouplingEdge::new(FileId(2), FileId(3), 1, 5, 10),
    /// ];
    /// let graph = CouplingGraph::build(&edges, WeightColumn::Coupling, 0.5, |_| true);
    /// assert_eq!(graph.node_count(), 2);
    /// assert_eq!(graph.edge_count(), 1);
    /// ```
    pub fn build(
        edges: &[CouplingEdge],
        column: WeightColumn,
        min_weight: f64,
        keep: impl Fn(FileId) -> bool,
    ) -> Self {
        let mut surviving: Vec<(FileId, FileId, f64, f64)> = edges
            .iter()
            .filter(|e| e.file_a != e.file_b)
            .filter(|e| e.weight(column) >= min_weight && e.weight(column) > 0.0)
            .filter(|e| keep(e.file_a) && keep(e.file_b))
            .map(|e| (e.file_a, e.file_b, e.weight(column), e.coupling))
            .collect();
        surviving.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));
        surviving.dedup_by(|x, y| (x.0, x.1) == (y.0, y.1));

        let files: BTreeSet<FileId> = surviving.iter().flat_map(|e| [e.0, e.1]).collect();
        let mut graph = UnGraph::with_capacity(files.len(), surviving.len());
        let mut index = BTreeMap::new();
        for file in files {
            index.insert(file, graph.add_node(file));
        }

        let mut coupling = BTreeMap::new();
        for (a, b, weight, dice) in surviving {
            graph.add_edge(index[&a], index[&b], weight);
            coupling.insert((a, b), dice);
        }

        Self {
            graph,
            index,
            coupling,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// File behind node `idx`.
    pub fn file(&self, idx: usize) -> FileId {
        self.graph[NodeIndex::new(idx)]
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.index.contains_key(&file)
    }

    /// Files in node order.
    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.graph.node_indices().map(move |idx| self.graph[idx])
    }

    /// Weighted edges as `(node, node, weight)` in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), *e.weight()))
    }

    /// Dice coupling of a surviving edge, whatever column weights the graph.
    pub fn coupling(&self, a: FileId, b: FileId) -> Option<f64> {
        let key = if a <= b { (a, b) } else { (b, a) };
        self.coupling.get(&key).copied()
    }

    /// Weighted adjacency lists indexed by node.
    pub fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adjacency = vec![Vec::new(); self.node_count()];
        for (a, b, weight) in self.edges() {
            adjacency[a].push((b, weight));
            adjacency[b].push((a, weight));
        }
        adjacency
    }

    /// Sum of edge weights.
    pub fn total_weight(&self) -> f64 {
        self.edges().map(|(_, _, w)| w).sum()
    }

    /// Newman modularity of `partition` (community per node) with the given
    /// resolution. Zero for a graph without edges.
    pub fn modularity(&self, partition: &[usize], resolution: f64) -> f64 {
        let m = self.total_weight();
        if m <= 0.0 {
            return 0.0;
        }
        let communities = partition.iter().copied().max().map_or(0, |c| c + 1);
        let mut internal = vec![0.0; communities];
        let mut degree = vec![0.0; communities];
        for (a, b, weight) in self.edges() {
            degree[partition[a]] += weight;
            degree[partition[b]] += weight;
            if partition[a] == partition[b] {
                internal[partition[a]] += weight;
            }
        }
        internal
            .iter()
            .zip(&degree)
            .map(|(&l, &d)| l / m - resolution * (d / (2.0 * m)).powi(2))
            .sum()
    }
}
