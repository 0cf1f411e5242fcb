use anyhow::{Context, Result};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::{Bfs, EdgeRef};
use serde::{Deserialize, Serialize};
use spade::{DelaunayTriangulation, Point2, Triangulation};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use super::distance::{footprint_distance_m, haversine_m};
use crate::commons::basic_functions::ensure_parent_dir;
use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::geometric::{BuildingCollection, BuildingRecord};

/// How edges are created
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum GraphMethod {
    /// Every pair closer than the threshold
    #[default]
    Distance,
    /// Delaunay triangulation of the centroids
    Delaunay,
}

impl fmt::Display for GraphMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphMethod::Distance => f.write_str("distance"),
            GraphMethod::Delaunay => f.write_str("delaunay"),
        }
    }
}

/// Undirected building graph, edge weight is the distance in meters
#[derive(Debug, Clone)]
pub struct ProximityGraph {
    graph: UnGraph<BuildingRecord, f64>,
    index: HashMap<String, NodeIndex>,
    pub method: GraphMethod,
    /// Edge threshold of a distance graph
    pub threshold_m: Option<f64>,
}

impl ProximityGraph {
    pub fn new(method: GraphMethod, threshold_m: Option<f64>) -> Self {
        ProximityGraph {
            graph: UnGraph::default(),
            index: HashMap::new(),
            method,
            threshold_m,
        }
    }

    /// Add a node; identifiers are unique
    pub fn add_node(&mut self, record: BuildingRecord) -> Result<NodeIndex, NetworkError> {
        if self.index.contains_key(&record.building_id) {
            return Err(NetworkError::DuplicateBuildingId(record.building_id));
        }
        let id = record.building_id.clone();
        let node = self.graph.add_node(record);
        self.index.insert(id, node);
        Ok(node)
    }

    /// Add or update the edge between two nodes
    pub fn add_edge(&mut self, a: NodeIndex, b: NodeIndex, distance_m: f64) {
        self.graph.update_edge(a, b, distance_m);
    }

    pub fn graph(&self) -> &UnGraph<BuildingRecord, f64> {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_index(&self, building_id: &str) -> Option<NodeIndex> {
        self.index.get(building_id).copied()
    }

    pub fn require_node(&self, building_id: &str) -> Result<NodeIndex, NetworkError> {
        self.node_index(building_id)
            .ok_or_else(|| NetworkError::UnknownBuilding(building_id.to_string()))
    }

    pub fn record(&self, node: NodeIndex) -> &BuildingRecord {
        &self.graph[node]
    }

    pub fn id(&self, node: NodeIndex) -> &str {
        &self.graph[node].building_id
    }

    /// Node indices in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn degree(&self, node: NodeIndex) -> usize {
        self.graph.edges(node).count()
    }

    /// Neighbor ids of a building
    pub fn neighbors(&self, building_id: &str) -> Result<Vec<&str>, NetworkError> {
        let node = self.require_node(building_id)?;
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors(node).collect();
        neighbors.sort();
        Ok(neighbors.into_iter().map(|n| self.id(n)).collect())
    }

    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let edge = self.graph.find_edge(self.node_index(a)?, self.node_index(b)?)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Edges as (source id, target id, distance)
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (self.id(e.source()), self.id(e.target()), *e.weight()))
    }

    /// Weighted shortest path lengths from `source` to every reachable node
    pub fn distances_from(&self, source: NodeIndex) -> HashMap<NodeIndex, f64> {
        petgraph::algo::dijkstra(&self.graph, source, None, |e| *e.weight())
    }

    /// Connected components, each in node order, ordered by their first node
    pub fn connected_components(&self) -> Vec<Vec<NodeIndex>> {
        let mut seen = HashSet::new();
        let mut components = Vec::new();

        for start in self.graph.node_indices() {
            if seen.contains(&start) {
                continue;
            }
            let mut component = Vec::new();
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(node) = bfs.next(&self.graph) {
                seen.insert(node);
                component.push(node);
            }
            component.sort();
            components.push(component);
        }
        components
    }

    pub fn is_connected(&self) -> bool {
        self.node_count() > 0 && self.connected_components().len() == 1
    }

    /// Graph as persisted in JSON
    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            crs: "EPSG:4326".to_string(),
            method: self.method,
            distance_threshold: self.threshold_m,
            nodes: self.nodes().map(|n| self.record(n).clone()).collect(),
            edges: self
                .edges()
                .map(|(source, target, distance_m)| EdgeRecord {
                    source: source.to_string(),
                    target: target.to_string(),
                    distance_m,
                    weight: distance_m,
                })
                .collect(),
        }
    }

    pub fn from_document(document: GraphDocument) -> Result<Self, NetworkError> {
        let mut graph = ProximityGraph::new(document.method, document.distance_threshold);
        for record in document.nodes {
            graph.add_node(record)?;
        }
        for edge in document.edges {
            let a = graph.require_node(&edge.source)?;
            let b = graph.require_node(&edge.target)?;
            graph.add_edge(a, b, edge.distance_m);
        }
        Ok(graph)
    }

    /// Save graph JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(&self.to_document())?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Load graph JSON
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open graph file {}", path.display()))?;
        let document: GraphDocument = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Invalid graph file {}", path.display()))?;
        Ok(Self::from_document(document)?)
    }

    /// Edge list `source,target,distance_m,weight`
    pub fn write_edges_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for edge in self.to_document().edges {
            writer.serialize(edge)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// JSON form of a graph: node records plus edge list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub crs: String,
    pub method: GraphMethod,
    pub distance_threshold: Option<f64>,
    pub nodes: Vec<BuildingRecord>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub target: String,
    pub distance_m: f64,
    pub weight: f64,
}

fn check_threshold(threshold_m: f64) -> Result<(), NetworkError> {
    if threshold_m.is_finite() && threshold_m >= 0.0 {
        Ok(())
    } else {
        Err(NetworkError::InvalidThreshold(threshold_m))
    }
}

fn add_nodes(graph: &mut ProximityGraph, collection: &BuildingCollection) -> Result<(), NetworkError> {
    for record in collection.records() {
        graph.add_node(record.clone())?;
    }
    log::info!("Added {} nodes to graph", graph.node_count());
    Ok(())
}

/// Threshold graph: an edge for every pair at most `threshold_m` apart
pub fn build_distance_graph(
    collection: &BuildingCollection,
    config: &NetworkConfig,
) -> Result<ProximityGraph, NetworkError> {
    collection.validate()?;
    check_threshold(config.threshold_m)?;

    log::info!("Building network graph with {} buildings", collection.len());
    log::info!("Distance threshold: {}m", config.threshold_m);
    log::info!("Distance method: {}", config.distance_method);
    log::info!("Use edge distance: {}", config.use_edge_distance);

    let mut graph = ProximityGraph::new(GraphMethod::Distance, Some(config.threshold_m));
    add_nodes(&mut graph, collection)?;

    let buildings = collection.buildings();
    let n = buildings.len();

    #[cfg(feature = "indicatif")]
    let progress = pair_progress((n * n.saturating_sub(1) / 2) as u64);

    for i in 0..n {
        for j in (i + 1)..n {
            let (b1, b2) = (&buildings[i], &buildings[j]);
            let distance = match (&b1.footprint, &b2.footprint) {
                (Some(f1), Some(f2)) if config.use_edge_distance => footprint_distance_m(f1, f2),
                _ => config
                    .distance_method
                    .distance_m(b1.record.centroid(), b2.record.centroid()),
            };

            if distance <= config.threshold_m {
                graph.add_edge(NodeIndex::new(i), NodeIndex::new(j), distance);
            }
        }
        #[cfg(feature = "indicatif")]
        progress.inc((n - i - 1) as u64);
    }

    #[cfg(feature = "indicatif")]
    progress.finish_and_clear();

    log::info!("Added {} edges to graph", graph.edge_count());
    Ok(graph)
}

/// Delaunay graph of the centroids, edges weighted by Haversine distance
pub fn build_delaunay_graph(collection: &BuildingCollection) -> Result<ProximityGraph> {
    collection.validate()?;
    log::info!("Building network graph using Delaunay triangulation");

    let mut graph = ProximityGraph::new(GraphMethod::Delaunay, None);
    add_nodes(&mut graph, collection)?;

    let mut triangulation: DelaunayTriangulation<Point2<f64>> = DelaunayTriangulation::new();
    // nodes sharing a vertex, i.e. coincident centroids
    let mut vertex_nodes: HashMap<usize, Vec<NodeIndex>> = HashMap::new();

    for (i, record) in collection.records().enumerate() {
        let handle = triangulation
            .insert(Point2::new(record.centroid_lon, record.centroid_lat))
            .map_err(|e| anyhow::anyhow!("{:?}", e))
            .with_context(|| format!("Cannot triangulate building {}", record.building_id))?;
        vertex_nodes
            .entry(handle.index())
            .or_default()
            .push(NodeIndex::new(i));
    }

    for nodes in vertex_nodes.values() {
        if let Some((&first, rest)) = nodes.split_first() {
            for &other in rest {
                graph.add_edge(first, other, 0.0);
            }
        }
    }

    for edge in triangulation.undirected_edges() {
        let [v0, v1] = edge.vertices();
        let (a, b) = match (
            vertex_nodes.get(&v0.fix().index()).and_then(|n| n.first()),
            vertex_nodes.get(&v1.fix().index()).and_then(|n| n.first()),
        ) {
            (Some(&a), Some(&b)) => (a, b),
            _ => continue,
        };
        let p0 = v0.position();
        let p1 = v1.position();
        let distance = haversine_m(
            geo::Point::new(p0.x, p0.y),
            geo::Point::new(p1.x, p1.y),
        );
        graph.add_edge(a, b, distance);
    }

    if triangulation.num_inner_faces() == 0 {
        log::warn!("Delaunay triangulation is degenerate (fewer than 3 non-collinear centroids)");
    }
    log::info!("Added {} edges from Delaunay triangulation", graph.edge_count());
    Ok(graph)
}

/// Build the graph with the configured method
pub fn build_network(collection: &BuildingCollection, config: &NetworkConfig) -> Result<ProximityGraph> {
    match config.method {
        GraphMethod::Distance => Ok(build_distance_graph(collection, config)?),
        GraphMethod::Delaunay => build_delaunay_graph(collection),
    }
}

#[cfg(feature = "indicatif")]
fn pair_progress(total: u64) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(total);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} pairs")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.set_message("Computing distances");
    bar
}

/// Whole-graph statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub density: f64,
    pub average_degree: f64,
    pub is_connected: bool,
    pub num_connected_components: usize,
    /// Mean weighted shortest path length, connected graphs only
    pub average_shortest_path_length: Option<f64>,
    pub average_clustering: f64,
}

impl NetworkStats {
    pub fn compute(graph: &ProximityGraph) -> Self {
        let n = graph.node_count();
        let m = graph.edge_count();

        let density = if n > 1 {
            2.0 * m as f64 / (n as f64 * (n - 1) as f64)
        } else {
            0.0
        };
        let average_degree = if n > 0 { 2.0 * m as f64 / n as f64 } else { 0.0 };

        let num_connected_components = graph.connected_components().len();
        let is_connected = n > 0 && num_connected_components == 1;

        let average_shortest_path_length = if !is_connected {
            None
        } else if n == 1 {
            Some(0.0)
        } else {
            let total: f64 = graph
                .nodes()
                .map(|source| graph.distances_from(source).values().sum::<f64>())
                .sum();
            Some(total / (n as f64 * (n - 1) as f64))
        };

        NetworkStats {
            num_nodes: n,
            num_edges: m,
            density,
            average_degree,
            is_connected,
            num_connected_components,
            average_shortest_path_length,
            average_clustering: average_clustering(graph),
        }
    }

    pub fn log(&self) {
        log::info!("Nodes: {}", self.num_nodes);
        log::info!("Edges: {}", self.num_edges);
        log::info!("Density: {:.4}", self.density);
        log::info!("Average degree: {:.2}", self.average_degree);
        log::info!("Connected: {}", self.is_connected);
        log::info!("Connected components: {}", self.num_connected_components);
        if let Some(length) = self.average_shortest_path_length {
            log::info!("Average shortest path length: {:.2} m", length);
        }
        log::info!("Average clustering: {:.4}", self.average_clustering);
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Unweighted local clustering averaged over all nodes (0 for degree < 2)
fn average_clustering(graph: &ProximityGraph) -> f64 {
    let n = graph.node_count();
    if n == 0 {
        return 0.0;
    }
    let g = graph.graph();

    let total: f64 = g
        .node_indices()
        .map(|node| {
            let neighbors: Vec<NodeIndex> = {
                let mut ns: Vec<NodeIndex> = g.neighbors(node).filter(|&x| x != node).collect();
                ns.sort();
                ns.dedup();
                ns
            };
            let k = neighbors.len();
            if k < 2 {
                return 0.0;
            }
            let mut links = 0usize;
            for (i, &a) in neighbors.iter().enumerate() {
                for &b in &neighbors[i + 1..] {
                    if g.find_edge(a, b).is_some() {
                        links += 1;
                    }
                }
            }
            2.0 * links as f64 / (k * (k - 1)) as f64
        })
        .sum();
    total / n as f64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geo::polygon;
    use crate::geometric::Building;
    use crate::network::DistanceMethod;

    pub(crate) fn record(id: &str, lon: f64, lat: f64, area: f64) -> BuildingRecord {
        BuildingRecord {
            building_id: id.to_string(),
            centroid_lon: lon,
            centroid_lat: lat,
            area_m2: area,
            height_m: None,
            building_type: None,
            usage: None,
        }
    }

    pub(crate) fn collection(records: Vec<BuildingRecord>) -> BuildingCollection {
        BuildingCollection::from_buildings(records.into_iter().map(Building::new).collect())
    }

    /// Two buildings 347.27 m apart
    pub(crate) fn pair() -> BuildingCollection {
        collection(vec![
            record("A", 32.85, 39.92, 100.0),
            record("B", 32.85, 39.92312307, 200.0),
        ])
    }

    /// Buildings on a north-south line, 0.001 degree (about 111 m) apart
    pub(crate) fn line(n: usize) -> BuildingCollection {
        collection(
            (0..n)
                .map(|i| record(&format!("L{}", i), 32.85, 39.92 + 0.001 * i as f64, 100.0 + i as f64))
                .collect(),
        )
    }

    pub(crate) fn config(threshold_m: f64) -> NetworkConfig {
        NetworkConfig {
            threshold_m,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_two_buildings_one_edge() {
        let graph = build_distance_graph(&pair(), &config(500.0)).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        let weight = graph.edge_weight("A", "B").unwrap();
        assert!((weight - 347.27).abs() < 0.01);
    }

    #[test]
    fn test_edges_respect_threshold() {
        let buildings = line(6);
        for threshold in [0.0, 100.0, 150.0, 250.0, 1000.0] {
            let graph = build_distance_graph(&buildings, &config(threshold)).unwrap();
            assert_eq!(graph.node_count(), buildings.len());
            assert!(graph.edges().all(|(_, _, w)| w <= threshold));
        }
        let graph = build_distance_graph(&buildings, &config(150.0)).unwrap();
        assert_eq!(graph.edge_count(), 5);
        assert!(graph.is_connected());
    }

    #[test]
    fn test_no_edges_is_valid() {
        let graph = build_distance_graph(&pair(), &config(10.0)).unwrap();
        assert_eq!(graph.edge_count(), 0);
        let stats = NetworkStats::compute(&graph);
        assert_eq!(stats.num_connected_components, 2);
        assert!(!stats.is_connected);
        assert_eq!(stats.average_shortest_path_length, None);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            build_distance_graph(&pair(), &config(-1.0)),
            Err(NetworkError::InvalidThreshold(_))
        ));
        assert!(matches!(
            build_distance_graph(&pair(), &config(f64::NAN)),
            Err(NetworkError::InvalidThreshold(_))
        ));
        assert!(matches!(
            build_distance_graph(&BuildingCollection::new(), &config(100.0)),
            Err(NetworkError::EmptyDataset)
        ));
        let dup = collection(vec![record("A", 0.0, 0.0, 1.0), record("A", 0.0, 0.0, 1.0)]);
        assert!(matches!(
            build_distance_graph(&dup, &config(100.0)),
            Err(NetworkError::DuplicateBuildingId(_))
        ));
    }

    #[test]
    fn test_edge_distance_uses_footprints() {
        let mut buildings = pair();
        for (building, lat) in buildings.buildings.iter_mut().zip([39.92, 39.92312307]) {
            building.footprint = Some(polygon![
                (x: 32.8495, y: lat - 0.0014),
                (x: 32.8505, y: lat - 0.0014),
                (x: 32.8505, y: lat + 0.0014),
                (x: 32.8495, y: lat + 0.0014),
            ]);
        }
        let edge_config = NetworkConfig {
            threshold_m: 50.0,
            use_edge_distance: true,
            ..NetworkConfig::default()
        };
        // footprints are about 36 m apart while centroids are 347 m apart
        let graph = build_distance_graph(&buildings, &edge_config).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edge_weight("A", "B").unwrap() < 50.0);

        let centroid_only = build_distance_graph(&pair(), &edge_config).unwrap();
        assert_eq!(centroid_only.edge_count(), 0);
    }

    #[test]
    fn test_euclidean_method() {
        let buildings = collection(vec![record("A", 0.0, 0.0, 1.0), record("B", 3.0, 4.0, 1.0)]);
        let euclid = NetworkConfig {
            threshold_m: 5.0,
            distance_method: DistanceMethod::Euclidean,
            ..NetworkConfig::default()
        };
        let graph = build_distance_graph(&buildings, &euclid).unwrap();
        assert_eq!(graph.edge_weight("B", "A"), Some(5.0));
    }

    #[test]
    fn test_delaunay_square_with_coincident_point() {
        let buildings = collection(vec![
            record("SW", 32.850, 39.920, 1.0),
            record("SE", 32.851, 39.920, 1.0),
            record("NE", 32.851, 39.921, 1.0),
            record("NW", 32.850, 39.921, 1.0),
            record("SW2", 32.850, 39.920, 1.0),
        ]);
        let graph = build_delaunay_graph(&buildings).unwrap();
        assert_eq!(graph.node_count(), 5);
        // 4 sides + 1 diagonal + the zero edge of the coincident pair
        assert_eq!(graph.edge_count(), 6);
        assert_eq!(graph.edge_weight("SW", "SW2"), Some(0.0));
        assert!(graph.is_connected());
        let side = graph.edge_weight("SW", "NW").unwrap();
        assert!((side - 111.19).abs() < 0.1);
    }

    #[test]
    fn test_document_roundtrip_and_unknown_edge() {
        let graph = build_distance_graph(&line(3), &config(150.0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        graph.save_json(&path).unwrap();
        let loaded = ProximityGraph::load_json(&path).unwrap();
        assert_eq!(loaded.to_document(), graph.to_document());
        assert_eq!(loaded.neighbors("L1").unwrap(), vec!["L0", "L2"]);

        let mut document = graph.to_document();
        document.edges[0].target = "missing".to_string();
        assert!(matches!(
            ProximityGraph::from_document(document),
            Err(NetworkError::UnknownBuilding(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_stats_triangle_with_tail() {
        // consecutive line edges plus L0-L2: a triangle with L3 hanging off L2
        let buildings = line(4);
        let mut graph = build_distance_graph(&buildings, &config(150.0)).unwrap();
        let (l0, l2) = (graph.node_index("L0").unwrap(), graph.node_index("L2").unwrap());
        graph.add_edge(l0, l2, 222.4);
        let stats = NetworkStats::compute(&graph);
        assert_eq!(stats.num_nodes, 4);
        assert_eq!(stats.num_edges, 4);
        assert!((stats.density - 4.0 / 6.0).abs() < 1e-12);
        assert!((stats.average_degree - 2.0).abs() < 1e-12);
        assert!(stats.is_connected);
        // L0 and L1 have clustering 1, L2 has 1/3, L3 has 0
        assert!((stats.average_clustering - (1.0 + 1.0 + 1.0 / 3.0) / 4.0).abs() < 1e-12);
        assert!(stats.average_shortest_path_length.unwrap() > 0.0);
    }

    #[test]
    fn test_edges_csv() {
        let graph = build_distance_graph(&pair(), &config(500.0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edges.csv");
        graph.write_edges_csv(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("source,target,distance_m,weight"));
        assert!(lines.next().unwrap().starts_with("A,B,347.27"));
    }
}
