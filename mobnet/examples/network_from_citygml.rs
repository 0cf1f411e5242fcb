//! Builds and analyzes the proximity network of the bundled sample file.
//!
//! ```sh
//! cargo run --example network_from_citygml
//! ```

use anyhow::Result;
use mobnet::config::{AccessibilityConfig, AnalysisConfig, ExtractConfig, NetworkConfig};
use mobnet::geometric::BuildingCollection;
use mobnet::network::accessibility::calculate_accessibility;
use mobnet::network::centrality::{compute_metrics, top_by};
use mobnet::network::graph::build_network;
use mobnet::network::paths::compute_shortest_paths;
use mobnet::network::NetworkStats;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let input = concat!(env!("CARGO_MANIFEST_DIR"), "/data/input/sample_buildings.gml");
    let buildings = BuildingCollection::from_citygml(input, &ExtractConfig::default())?;
    println!("Extracted {} buildings", buildings.len());

    let config = NetworkConfig {
        threshold_m: 300.0,
        ..NetworkConfig::default()
    };
    let graph = build_network(&buildings, &config)?;
    let stats = NetworkStats::compute(&graph);
    println!(
        "Graph: {} nodes, {} edges, {} components",
        stats.num_nodes, stats.num_edges, stats.num_connected_components
    );

    let metrics = compute_metrics(&graph, &AnalysisConfig::default());
    for m in top_by(&metrics, 3, |m| m.betweenness_centrality) {
        println!("{:<10} betweenness {:.4}", m.building_id, m.betweenness_centrality);
    }

    let paths = compute_shortest_paths(&graph, 10);
    for (pair, path) in paths.iter() {
        println!("{}: {}", pair, path.join(" -> "));
    }

    let accessibility = calculate_accessibility(&buildings, &graph, &AccessibilityConfig::default())?;
    for record in &accessibility {
        println!(
            "{:<10} within 500 m: {}, reachable: {}, weighted: {:.2}",
            record.building_id,
            record.distance_count,
            record.network_reachable_count,
            record.weighted_accessibility
        );
    }

    Ok(())
}
