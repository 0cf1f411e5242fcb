//! Pipeline stages. Each stage reads its inputs from disk and writes its
//! artifacts, so stages can be run one by one from the command line or chained
//! by [`run`].

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::*;
use crate::config::{
    AccessibilityConfig, AnalysisConfig, ExtractConfig, NetworkConfig, PipelineConfig,
    RenderConfig,
};
use crate::geometric::building::{combine_footprints, footprints_path};
use crate::geometric::BuildingCollection;
use crate::network::accessibility::{
    calculate_accessibility, read_accessibility_csv, write_accessibility_csv,
};
use crate::network::centrality::{compute_metrics, log_summary, read_metrics_csv, write_metrics_csv};
use crate::network::graph::build_network;
use crate::network::paths::compute_shortest_paths;
use crate::network::{
    AccessibilityRecord, AccessibilitySummary, NetworkStats, NodeMetrics, ProximityGraph,
    ShortestPaths,
};
use crate::render::{render_all, ChartInputs};

fn banner(title: &str) {
    log::info!("{}", "=".repeat(60));
    log::info!("{}", title);
    log::info!("{}", "=".repeat(60));
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{} not found: {}", what, path.display());
    }
    Ok(())
}

/// `<dir>/<stem><suffix>` next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", stem, suffix))
}

/// Step 1: CityGML file to entity table CSV plus footprint GeoJSON
pub fn extract(input: &Path, output_csv: &Path, config: &ExtractConfig) -> Result<BuildingCollection> {
    banner("Step 1: Building Footprint Extraction");
    require_file(input, "Input file")?;

    let collection = BuildingCollection::from_citygml(input, config)
        .with_context(|| format!("Error parsing CityGML file {}", input.display()))?;
    if collection.is_empty() {
        log::warn!("No buildings extracted from {}", input.display());
        return Ok(collection);
    }

    collection.summary().log();

    log::info!("Saving to CSV: {}", output_csv.display());
    collection.write_csv(output_csv)?;
    let footprints = footprints_path(output_csv);
    collection.write_footprints_geojson(&footprints)?;
    log::info!(
        "Successfully saved {} buildings to {} (footprints: {})",
        collection.len(),
        output_csv.display(),
        footprints.display()
    );
    Ok(collection)
}

/// Merge the per-file footprint files of a directory
pub fn combine(input_dir: &Path, output: &Path) -> Result<usize> {
    banner("Combine Footprints");
    combine_footprints(input_dir, output)
}

/// Step 2: entity table to graph JSON, with statistics JSON and edge list CSV
pub fn build(input_csv: &Path, output_json: &Path, config: &NetworkConfig) -> Result<ProximityGraph> {
    banner("Step 2: Network Graph Construction");
    require_file(input_csv, "Input file")?;

    log::info!("Loading building data from: {}", input_csv.display());
    let collection = BuildingCollection::read_csv_with_footprints(input_csv)?;
    log::info!("Loaded {} buildings", collection.len());

    let graph = build_network(&collection, config)?;
    let stats = NetworkStats::compute(&graph);
    stats.log();

    graph.save_json(output_json)?;
    log::info!("Saved graph to {}", output_json.display());

    let stats_path = sibling(output_json, "_stats.json");
    stats.save_json(&stats_path)?;
    let edges_path = sibling(output_json, "_edges.csv");
    graph.write_edges_csv(&edges_path)?;
    log::info!(
        "Saved statistics to {} and edge list to {}",
        stats_path.display(),
        edges_path.display()
    );
    Ok(graph)
}

/// Step 3: graph JSON to centrality metrics CSV, plus shortest paths JSON when asked
pub fn analyze(
    graph_json: &Path,
    output_csv: &Path,
    paths_json: Option<&Path>,
    config: &AnalysisConfig,
) -> Result<Vec<NodeMetrics>> {
    banner("Step 3: Network Analysis");
    require_file(graph_json, "Graph file")?;

    let graph = ProximityGraph::load_json(graph_json)?;
    log::info!(
        "Loaded graph with {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    let metrics = compute_metrics(&graph, config);
    write_metrics_csv(&metrics, output_csv)?;
    log::info!("Saved metrics to {}", output_csv.display());

    if let Some(paths_json) = paths_json {
        let paths = compute_shortest_paths(&graph, config.max_paths);
        paths.save_json(paths_json)?;
        log::info!("Saved paths to {}", paths_json.display());
    }

    log_summary(&metrics);
    Ok(metrics)
}

/// Step 4: entity table and graph to accessibility CSV
pub fn accessibility(
    input_csv: &Path,
    graph_json: &Path,
    output_csv: &Path,
    config: &AccessibilityConfig,
) -> Result<Vec<AccessibilityRecord>> {
    banner("Step 4: Accessibility Scoring");
    require_file(input_csv, "Input file")?;
    require_file(graph_json, "Graph file")?;

    let collection = BuildingCollection::read_csv(input_csv)?;
    log::info!("Loaded {} buildings", collection.len());
    let graph = ProximityGraph::load_json(graph_json)?;
    log::info!(
        "Loaded graph with {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    let records = calculate_accessibility(&collection, &graph, config)?;
    write_accessibility_csv(&records, output_csv)?;
    log::info!("Saved accessibility metrics to {}", output_csv.display());

    AccessibilitySummary::compute(&records).log(config.threshold_m);
    Ok(records)
}

/// Optional stage inputs of [`visualize`]
#[derive(Debug, Clone, Default)]
pub struct VisualizeInputs {
    pub metrics: Option<PathBuf>,
    pub accessibility: Option<PathBuf>,
    pub paths: Option<PathBuf>,
}

/// Step 5: SVG charts
pub fn visualize(
    buildings_csv: &Path,
    graph_json: &Path,
    optional: &VisualizeInputs,
    output_dir: &Path,
    config: &RenderConfig,
) -> Result<Vec<PathBuf>> {
    banner("Step 5: Visualization");
    require_file(buildings_csv, "Input file")?;
    require_file(graph_json, "Graph file")?;

    let buildings = BuildingCollection::read_csv(buildings_csv)?;
    let graph = ProximityGraph::load_json(graph_json)?;

    let metrics = optional
        .metrics
        .as_deref()
        .map(read_metrics_csv)
        .transpose()?;
    let accessibility = optional
        .accessibility
        .as_deref()
        .map(read_accessibility_csv)
        .transpose()?;
    let paths = optional
        .paths
        .as_deref()
        .map(ShortestPaths::load_json)
        .transpose()?;

    let inputs = ChartInputs {
        graph: &graph,
        buildings: Some(&buildings),
        metrics: metrics.as_deref(),
        accessibility: accessibility.as_deref(),
        paths: paths.as_ref(),
    };
    render_all(&inputs, output_dir, config)
}

/// GML files named directly, or found (`*.gml`, `*.xml`) in named directories
pub fn collect_input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .with_context(|| format!("Failed to list {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .map(|ext| {
                                let ext = ext.to_string_lossy().to_ascii_lowercase();
                                ext == "gml" || ext == "xml"
                            })
                            .unwrap_or(false)
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        bail!("No GML files found in the given inputs");
    }
    Ok(files)
}

/// Where a full run writes its artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct RunLayout {
    /// Intermediate tables, graph and paths
    pub processed_dir: PathBuf,
    /// Charts
    pub output_dir: PathBuf,
}

impl RunLayout {
    /// Intermediate files go to a `processed` directory beside `output_dir`
    pub fn new(output_dir: &Path) -> Self {
        let parent = match output_dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        RunLayout {
            processed_dir: parent.join("processed"),
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn buildings_csv(&self) -> PathBuf {
        self.processed_dir.join(BUILDINGS_CSV)
    }

    pub fn graph_json(&self) -> PathBuf {
        self.processed_dir.join(GRAPH_JSON)
    }

    pub fn metrics_csv(&self) -> PathBuf {
        self.processed_dir.join(METRICS_CSV)
    }

    pub fn paths_json(&self) -> PathBuf {
        self.processed_dir.join(PATHS_JSON)
    }

    pub fn accessibility_csv(&self) -> PathBuf {
        self.processed_dir.join(ACCESSIBILITY_CSV)
    }
}

/// Every stage in sequence over one or more CityGML inputs
pub fn run(inputs: &[PathBuf], output_dir: &Path, config: &PipelineConfig) -> Result<RunLayout> {
    banner("Mobility Network Analysis Pipeline");

    let layout = RunLayout::new(output_dir);
    std::fs::create_dir_all(&layout.processed_dir)
        .with_context(|| format!("Failed to create {}", layout.processed_dir.display()))?;
    std::fs::create_dir_all(&layout.output_dir)
        .with_context(|| format!("Failed to create {}", layout.output_dir.display()))?;

    let files = collect_input_files(inputs)?;
    log::info!("Found {} GML files", files.len());

    let mut collections = Vec::with_capacity(files.len());
    for file in &files {
        log::info!("Processing: {}", file.display());
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let output_csv = layout.processed_dir.join(format!("{}_buildings.csv", stem));
        let collection = extract(file, &output_csv, &config.extract)?;
        if !collection.is_empty() {
            collections.push(collection);
        }
    }

    let combined = BuildingCollection::merge(collections)?;
    if combined.is_empty() {
        bail!("No buildings extracted, pipeline stopped");
    }
    let buildings_csv = layout.buildings_csv();
    combined.write_csv(&buildings_csv)?;
    combined.write_footprints_geojson(footprints_path(&buildings_csv))?;
    log::info!("Combined {} buildings", combined.len());

    let graph = build(&buildings_csv, &layout.graph_json(), &config.network)?;
    log::info!(
        "Network graph created: {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    let metrics = analyze(
        &layout.graph_json(),
        &layout.metrics_csv(),
        Some(&layout.paths_json()),
        &config.analysis,
    )?;
    log::info!("Network analysis completed: {} buildings analyzed", metrics.len());

    let records = accessibility(
        &buildings_csv,
        &layout.graph_json(),
        &layout.accessibility_csv(),
        &config.accessibility,
    )?;
    log::info!(
        "Accessibility calculation completed: {} buildings analyzed",
        records.len()
    );

    let optional = VisualizeInputs {
        metrics: Some(layout.metrics_csv()),
        accessibility: Some(layout.accessibility_csv()),
        paths: Some(layout.paths_json()),
    };
    visualize(
        &buildings_csv,
        &layout.graph_json(),
        &optional,
        &layout.output_dir,
        &config.render,
    )?;

    banner("Pipeline completed successfully!");
    log::info!("Results saved to: {}", layout.output_dir.display());
    Ok(layout)
}
