use anyhow::{Context, Result};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use super::graph::ProximityGraph;
use crate::commons::basic_functions::ensure_parent_dir;
use crate::config::AnalysisConfig;
use crate::error::NetworkError;

/// Centrality metrics of one building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub building_id: String,
    pub degree: usize,
    pub degree_centrality: f64,
    pub betweenness_centrality: f64,
    pub closeness_centrality: f64,
    pub pagerank: f64,
}

/// `degree / (n - 1)`, 1.0 for a single node graph
pub fn degree_centrality(graph: &ProximityGraph) -> Vec<f64> {
    let n = graph.node_count();
    if n <= 1 {
        return vec![1.0; n];
    }
    let scale = 1.0 / (n - 1) as f64;
    graph.nodes().map(|v| graph.degree(v) as f64 * scale).collect()
}

/// Brandes betweenness over distance-weighted shortest paths, normalized by
/// `1 / ((n - 1)(n - 2))`. With `sample = Some(k)`, only k evenly spaced source
/// nodes are expanded and the result is scaled by `n / k`.
pub fn betweenness_centrality(graph: &ProximityGraph, sample: Option<usize>) -> Vec<f64> {
    let n = graph.node_count();
    let mut betweenness = vec![0.0; n];
    if n <= 2 {
        return betweenness;
    }

    let sources: Vec<usize> = match sample {
        Some(k) if k > 0 && k < n => (0..k).map(|i| i * n / k).collect(),
        _ => (0..n).collect(),
    };

    for &source in &sources {
        accumulate_dependencies(graph, source, &mut betweenness);
    }

    let mut scale = 1.0 / ((n - 1) * (n - 2)) as f64;
    if sources.len() < n {
        scale *= n as f64 / sources.len() as f64;
    }
    betweenness.iter_mut().for_each(|b| *b *= scale);
    betweenness
}

/// Dijkstra frontier entry, ordered so that `BinaryHeap` pops the nearest
struct Frontier {
    distance: f64,
    order: usize,
    node: usize,
    pred: Option<usize>,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// One source step of Brandes' algorithm
fn accumulate_dependencies(graph: &ProximityGraph, source: usize, betweenness: &mut [f64]) {
    let g = graph.graph();
    let n = g.node_count();

    let mut settled: Vec<usize> = Vec::with_capacity(n);
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut sigma = vec![0.0_f64; n];
    let mut dist: Vec<Option<f64>> = vec![None; n];
    let mut seen: Vec<Option<f64>> = vec![None; n];

    sigma[source] = 1.0;
    seen[source] = Some(0.0);

    let mut counter = 0usize;
    let mut heap = BinaryHeap::new();
    heap.push(Frontier {
        distance: 0.0,
        order: counter,
        node: source,
        pred: None,
    });

    while let Some(Frontier {
        distance,
        node: v,
        pred,
        ..
    }) = heap.pop()
    {
        if dist[v].is_some() {
            continue;
        }
        if let Some(p) = pred {
            sigma[v] += sigma[p];
        }
        settled.push(v);
        dist[v] = Some(distance);

        for edge in g.edges(NodeIndex::new(v)) {
            let w = if edge.source().index() == v {
                edge.target().index()
            } else {
                edge.source().index()
            };
            let candidate = distance + *edge.weight();

            if dist[w].is_none() && seen[w].map_or(true, |d| candidate < d) {
                seen[w] = Some(candidate);
                counter += 1;
                heap.push(Frontier {
                    distance: candidate,
                    order: counter,
                    node: w,
                    pred: Some(v),
                });
                sigma[w] = 0.0;
                preds[w] = vec![v];
            } else if seen[w] == Some(candidate) {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }

    let mut delta = vec![0.0_f64; n];
    while let Some(w) = settled.pop() {
        let coefficient = (1.0 + delta[w]) / sigma[w];
        for &v in &preds[w] {
            delta[v] += sigma[v] * coefficient;
        }
        if w != source {
            betweenness[w] += delta[w];
        }
    }
}

/// Component-local closeness over weighted distances:
/// `(reachable - 1) / sum(distances)`, 0 for isolated nodes
pub fn closeness_centrality(graph: &ProximityGraph) -> Vec<f64> {
    graph
        .nodes()
        .map(|v| {
            let distances = graph.distances_from(v);
            let reachable = distances.len();
            let total: f64 = distances.values().sum();
            if reachable > 1 && total > 0.0 {
                (reachable - 1) as f64 / total
            } else {
                0.0
            }
        })
        .collect()
}

/// Weighted PageRank by power iteration
///
/// A node spreads its rank over its edges in proportion to their weight.
/// Rank of nodes without weighted edges is spread uniformly.
pub fn pagerank(
    graph: &ProximityGraph,
    damping: f64,
    max_iter: usize,
    tolerance: f64,
) -> Result<Vec<f64>, NetworkError> {
    let g = graph.graph();
    let n = g.node_count();
    if n == 0 {
        return Ok(Vec::new());
    }
    let nf = n as f64;

    let out_weight: Vec<f64> = g
        .node_indices()
        .map(|v| g.edges(v).map(|e| *e.weight()).sum())
        .collect();

    let mut ranks = vec![1.0 / nf; n];
    for _ in 0..max_iter {
        let previous = ranks.clone();
        let dangling: f64 = (0..n)
            .filter(|&u| out_weight[u] <= 0.0)
            .map(|u| previous[u])
            .sum();
        let base = (damping * dangling + 1.0 - damping) / nf;
        ranks.iter_mut().for_each(|r| *r = base);

        for edge in g.edge_references() {
            let (a, b) = (edge.source().index(), edge.target().index());
            let weight = *edge.weight();
            if out_weight[a] > 0.0 {
                ranks[b] += damping * previous[a] * weight / out_weight[a];
            }
            if a != b && out_weight[b] > 0.0 {
                ranks[a] += damping * previous[b] * weight / out_weight[b];
            }
        }

        let error: f64 = ranks.iter().zip(&previous).map(|(x, y)| (x - y).abs()).sum();
        if error < nf * tolerance {
            return Ok(ranks);
        }
    }
    Err(NetworkError::PageRankDidNotConverge(max_iter))
}

/// Every centrality of every node, in node order
pub fn compute_metrics(graph: &ProximityGraph, config: &AnalysisConfig) -> Vec<NodeMetrics> {
    let n = graph.node_count();
    log::info!("Calculating centrality metrics...");

    log::info!("  Calculating degree centrality...");
    let degree = degree_centrality(graph);

    log::info!("  Calculating betweenness centrality...");
    let sample = config.betweenness_sample(n);
    if let Some(k) = sample {
        log::info!("    Large graph, sampling {} source nodes", k);
    }
    let betweenness = betweenness_centrality(graph, sample);

    log::info!("  Calculating closeness centrality...");
    if !graph.is_connected() {
        log::warn!("    Graph is not connected, closeness is computed per component");
    }
    let closeness = closeness_centrality(graph);

    log::info!("  Calculating PageRank...");
    let ranks = match pagerank(
        graph,
        config.pagerank_damping,
        config.pagerank_max_iter,
        config.pagerank_tolerance,
    ) {
        Ok(ranks) => ranks,
        Err(e) => {
            log::warn!("    {}, using uniform PageRank", e);
            vec![1.0 / n as f64; n]
        }
    };

    graph
        .nodes()
        .map(|v| {
            let i = v.index();
            NodeMetrics {
                building_id: graph.id(v).to_string(),
                degree: graph.degree(v),
                degree_centrality: degree[i],
                betweenness_centrality: betweenness[i],
                closeness_centrality: closeness[i],
                pagerank: ranks[i],
            }
        })
        .collect()
}

/// The `k` highest scoring nodes, ties kept in node order
pub fn top_by<F>(metrics: &[NodeMetrics], k: usize, score: F) -> Vec<&NodeMetrics>
where
    F: Fn(&NodeMetrics) -> f64,
{
    let mut sorted: Vec<&NodeMetrics> = metrics.iter().collect();
    sorted.sort_by(|a, b| score(b).total_cmp(&score(a)));
    sorted.truncate(k);
    sorted
}

pub fn log_summary(metrics: &[NodeMetrics]) {
    log::info!("Centrality metrics summary:");
    let rankings: [(&str, fn(&NodeMetrics) -> f64); 4] = [
        ("degree", |m| m.degree as f64),
        ("betweenness", |m| m.betweenness_centrality),
        ("closeness", |m| m.closeness_centrality),
        ("PageRank", |m| m.pagerank),
    ];
    for (name, score) in rankings {
        if let Some(best) = top_by(metrics, 1, score).first() {
            log::info!("  Highest {}: {} (value={:.4})", name, best.building_id, score(best));
        }
    }
}

pub fn write_metrics_csv<P: AsRef<Path>>(metrics: &[NodeMetrics], path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for m in metrics {
        writer.serialize(m)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_metrics_csv<P: AsRef<Path>>(path: P) -> Result<Vec<NodeMetrics>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open metrics file {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<NodeMetrics>, _>>()
        .with_context(|| format!("Invalid metrics file {}", path.display()))
}
