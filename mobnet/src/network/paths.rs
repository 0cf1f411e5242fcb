use anyhow::{Context, Result};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::graph::ProximityGraph;
use crate::commons::basic_functions::ensure_parent_dir;
use crate::error::NetworkError;

/// Shortest paths between node pairs, keyed `"source->target"`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortestPaths {
    pub paths: BTreeMap<String, Vec<String>>,
    pub path_lengths: BTreeMap<String, f64>,
    /// Unordered node pairs in the graph
    pub total_pairs: usize,
    /// Pairs with a path among the evaluated ones
    pub calculated_pairs: usize,
}

pub fn pair_key(source: &str, target: &str) -> String {
    format!("{}->{}", source, target)
}

/// Weighted shortest path: total length and node sequence, None when unreachable
pub fn shortest_path(
    graph: &ProximityGraph,
    source: NodeIndex,
    target: NodeIndex,
) -> Option<(f64, Vec<NodeIndex>)> {
    petgraph::algo::astar(
        graph.graph(),
        source,
        |node| node == target,
        |e| *e.weight(),
        |_| 0.0,
    )
}

/// Shortest path between two buildings by id
pub fn shortest_path_by_id(
    graph: &ProximityGraph,
    source: &str,
    target: &str,
) -> Result<Option<(f64, Vec<String>)>, NetworkError> {
    let a = graph.require_node(source)?;
    let b = graph.require_node(target)?;
    Ok(shortest_path(graph, a, b).map(|(length, nodes)| {
        (
            length,
            nodes.into_iter().map(|n| graph.id(n).to_string()).collect(),
        )
    }))
}

/// Node pairs `(i, j)`, `i < j`, in node order; above `max_pairs` an evenly
/// strided subset of that sequence
fn select_pairs(n: usize, max_pairs: usize) -> Vec<(usize, usize)> {
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let total = pairs.len();
    if total <= max_pairs {
        return pairs;
    }
    (0..max_pairs).map(|k| pairs[k * total / max_pairs]).collect()
}

/// Shortest paths between every pair of nodes, at most `max_paths` pairs
pub fn compute_shortest_paths(graph: &ProximityGraph, max_paths: usize) -> ShortestPaths {
    log::info!("Calculating shortest paths...");
    let n = graph.node_count();
    let total_pairs = n * n.saturating_sub(1) / 2;
    log::info!("Total node pairs: {}", total_pairs);
    if total_pairs > max_paths {
        log::info!("Large graph detected, calculating paths for {} sampled pairs", max_paths);
    }

    let mut result = ShortestPaths {
        total_pairs,
        ..ShortestPaths::default()
    };

    for (i, j) in select_pairs(n, max_paths) {
        let (source, target) = (NodeIndex::new(i), NodeIndex::new(j));
        if let Some((length, nodes)) = shortest_path(graph, source, target) {
            let key = pair_key(graph.id(source), graph.id(target));
            result.paths.insert(
                key.clone(),
                nodes.into_iter().map(|v| graph.id(v).to_string()).collect(),
            );
            result.path_lengths.insert(key, length);
            result.calculated_pairs += 1;
        }
    }

    log::info!("Calculated {} shortest paths", result.calculated_pairs);
    result
}

impl ShortestPaths {
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read paths file {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid paths file {}", path.display()))
    }

    /// Node sequences in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.paths.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::graph::build_distance_graph;
    use crate::network::graph::tests::{config, line, pair};

    #[test]
    fn test_shortest_path_along_line() {
        let graph = build_distance_graph(&line(4), &config(150.0)).unwrap();
        let (length, nodes) = shortest_path_by_id(&graph, "L0", "L3").unwrap().unwrap();
        assert_eq!(nodes, vec!["L0", "L1", "L2", "L3"]);
        assert!((length - 3.0 * 111.19).abs() < 0.1);
        assert!(shortest_path_by_id(&graph, "L0", "nope").is_err());
    }

    #[test]
    fn test_unreachable_pairs_are_skipped() {
        let graph = build_distance_graph(&pair(), &config(100.0)).unwrap();
        let paths = compute_shortest_paths(&graph, 1000);
        assert_eq!(paths.total_pairs, 1);
        assert_eq!(paths.calculated_pairs, 0);
        assert!(paths.paths.is_empty());
    }

    #[test]
    fn test_all_pairs_and_sampling() {
        let graph = build_distance_graph(&line(5), &config(150.0)).unwrap();
        let paths = compute_shortest_paths(&graph, 1000);
        assert_eq!(paths.total_pairs, 10);
        assert_eq!(paths.calculated_pairs, 10);
        assert_eq!(paths.paths["L1->L3"], vec!["L1", "L2", "L3"]);

        let sampled = compute_shortest_paths(&graph, 4);
        assert_eq!(sampled.total_pairs, 10);
        assert_eq!(sampled.calculated_pairs, 4);
        assert_eq!(select_pairs(5, 4), vec![(0, 1), (0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_json_roundtrip() {
        let graph = build_distance_graph(&line(3), &config(150.0)).unwrap();
        let paths = compute_shortest_paths(&graph, 1000);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paths.json");
        paths.save_json(&path).unwrap();
        assert_eq!(ShortestPaths::load_json(&path).unwrap(), paths);
    }
}
