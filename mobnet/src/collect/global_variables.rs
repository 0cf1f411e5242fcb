/// Chart directory of `run`; intermediate files go to `./data/processed`
pub const OUTPUT_PATH: &str = "./data/output";

/// Edge creation threshold of the proximity graph, in meters
pub const DEFAULT_NETWORK_THRESHOLD_M: f64 = 200.0;
/// Edge threshold of the `run` command when no config file sets one
pub const RUN_NETWORK_THRESHOLD_M: f64 = 500.0;
/// Radius of the accessibility counts, in meters
pub const DEFAULT_ACCESSIBILITY_THRESHOLD_M: f64 = 500.0;
/// Height of one storey when only `storeysAboveGround` is known
pub const DEFAULT_STOREY_HEIGHT_M: f64 = 3.0;

/// Exact betweenness up to this many nodes, sampled pivots above
pub const BETWEENNESS_EXACT_MAX_NODES: usize = 50;
pub const BETWEENNESS_SAMPLE_SIZE: usize = 50;
pub const DEFAULT_MAX_PATHS: usize = 1000;

pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_MAX_ITER: usize = 100;
/// Per-node tolerance, the convergence test uses `n * PAGERANK_TOLERANCE`
pub const PAGERANK_TOLERANCE: f64 = 1e-6;

pub const PATHS_TO_DRAW: usize = 10;
pub const LABELLED_NODES_MAX: usize = 20;
pub const LABEL_MAX_CHARS: usize = 10;
pub const CHART_WIDTH: u32 = 1400;
pub const CHART_HEIGHT: u32 = 1000;

pub const BUILDINGS_CSV: &str = "all_buildings.csv";
pub const GRAPH_JSON: &str = "building_network_graph.json";
pub const METRICS_CSV: &str = "network_metrics.csv";
pub const PATHS_JSON: &str = "network_paths.json";
pub const ACCESSIBILITY_CSV: &str = "accessibility_metrics.csv";
