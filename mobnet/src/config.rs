use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::collect::global_variables::*;
use crate::network::{DistanceMethod, GraphMethod};

/// Feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Height of one storey when only `storeysAboveGround` is known
    pub default_storey_height: f64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            default_storey_height: DEFAULT_STOREY_HEIGHT_M,
        }
    }
}

/// Proximity graph parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum edge length in meters
    pub threshold_m: f64,
    pub method: GraphMethod,
    pub distance_method: DistanceMethod,
    /// Use footprint edge-to-edge distance instead of centroid distance
    pub use_edge_distance: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            threshold_m: DEFAULT_NETWORK_THRESHOLD_M,
            method: GraphMethod::default(),
            distance_method: DistanceMethod::default(),
            use_edge_distance: false,
        }
    }
}

/// Centrality and shortest path parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Betweenness is exact up to this node count
    pub betweenness_exact_max_nodes: usize,
    /// Number of pivots when betweenness is sampled
    pub betweenness_sample_size: usize,
    pub pagerank_damping: f64,
    pub pagerank_max_iter: usize,
    pub pagerank_tolerance: f64,
    /// Upper bound of node pairs in the shortest path set
    pub max_paths: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            betweenness_exact_max_nodes: BETWEENNESS_EXACT_MAX_NODES,
            betweenness_sample_size: BETWEENNESS_SAMPLE_SIZE,
            pagerank_damping: PAGERANK_DAMPING,
            pagerank_max_iter: PAGERANK_MAX_ITER,
            pagerank_tolerance: PAGERANK_TOLERANCE,
            max_paths: DEFAULT_MAX_PATHS,
        }
    }
}

impl AnalysisConfig {
    /// Pivot count for a graph of `node_count` nodes, None for exact betweenness
    pub fn betweenness_sample(&self, node_count: usize) -> Option<usize> {
        if node_count > self.betweenness_exact_max_nodes {
            Some(self.betweenness_sample_size.min(node_count))
        } else {
            None
        }
    }
}

/// Accessibility scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessibilityConfig {
    pub threshold_m: f64,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        AccessibilityConfig {
            threshold_m: DEFAULT_ACCESSIBILITY_THRESHOLD_M,
        }
    }
}

/// Chart parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Number of shortest paths highlighted in `optimal_paths.svg`
    pub paths_to_draw: usize,
    /// Node labels are drawn up to this node count
    pub labelled_nodes_max: usize,
    pub label_max_chars: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            width: CHART_WIDTH,
            height: CHART_HEIGHT,
            paths_to_draw: PATHS_TO_DRAW,
            labelled_nodes_max: LABELLED_NODES_MAX,
            label_max_chars: LABEL_MAX_CHARS,
        }
    }
}

/// Parameters of a full pipeline run, loadable from JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extract: ExtractConfig,
    #[serde(deserialize_with = "deserialize_run_network")]
    pub network: NetworkConfig,
    pub analysis: AnalysisConfig,
    pub accessibility: AccessibilityConfig,
    pub render: RenderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            extract: ExtractConfig::default(),
            network: NetworkConfig {
                threshold_m: RUN_NETWORK_THRESHOLD_M,
                ..NetworkConfig::default()
            },
            analysis: AnalysisConfig::default(),
            accessibility: AccessibilityConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

/// Fields of a `network` section; absent ones keep the run defaults
#[derive(Deserialize)]
struct NetworkOverrides {
    threshold_m: Option<f64>,
    method: Option<GraphMethod>,
    distance_method: Option<DistanceMethod>,
    use_edge_distance: Option<bool>,
}

fn deserialize_run_network<'de, D>(deserializer: D) -> Result<NetworkConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = NetworkOverrides::deserialize(deserializer)?;
    let defaults = PipelineConfig::default().network;
    Ok(NetworkConfig {
        threshold_m: overrides.threshold_m.unwrap_or(defaults.threshold_m),
        method: overrides.method.unwrap_or(defaults.method),
        distance_method: overrides.distance_method.unwrap_or(defaults.distance_method),
        use_edge_distance: overrides.use_edge_distance.unwrap_or(defaults.use_edge_distance),
    })
}

impl PipelineConfig {
    /// Load a config file; missing fields take their default value
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
