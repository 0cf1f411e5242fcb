use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::distance::haversine_m;
use super::graph::ProximityGraph;
use crate::commons::basic_functions::{ensure_parent_dir, mean, min_max_normalize};
use crate::config::AccessibilityConfig;
use crate::error::NetworkError;
use crate::geometric::BuildingCollection;

/// Accessibility scores of one building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityRecord {
    pub building_id: String,
    /// Other buildings within the threshold, straight-line
    pub distance_count: usize,
    /// Other buildings within the threshold along the graph
    pub network_reachable_count: usize,
    /// Mean graph distance to the rest of the component
    pub avg_path_distance_m: Option<f64>,
    pub weighted_accessibility: f64,
}

/// For every building, the number of other buildings within `threshold_m` (Haversine)
pub fn distance_counts(collection: &BuildingCollection, threshold_m: f64) -> Vec<usize> {
    log::info!(
        "Calculating distance-based accessibility (threshold: {}m)...",
        threshold_m
    );
    let centroids: Vec<_> = collection.records().map(|r| r.centroid()).collect();
    centroids
        .iter()
        .enumerate()
        .map(|(i, &a)| {
            centroids
                .iter()
                .enumerate()
                .filter(|&(j, &b)| i != j && haversine_m(a, b) <= threshold_m)
                .count()
        })
        .collect()
}

/// For every node, the number of other nodes with a weighted path of at most `threshold_m`
pub fn network_reachable_counts(graph: &ProximityGraph, threshold_m: f64) -> Vec<usize> {
    log::info!(
        "Calculating network-based accessibility (threshold: {}m)...",
        threshold_m
    );
    graph
        .nodes()
        .map(|v| {
            graph
                .distances_from(v)
                .iter()
                .filter(|&(&w, &d)| w != v && d <= threshold_m)
                .count()
        })
        .collect()
}

/// For every node, the mean weighted path length to the other nodes of its component
pub fn average_path_distances(graph: &ProximityGraph) -> Vec<Option<f64>> {
    log::info!("Calculating average path distances...");
    graph
        .nodes()
        .map(|v| {
            let distances: Vec<f64> = graph
                .distances_from(v)
                .into_iter()
                .filter(|&(w, _)| w != v)
                .map(|(_, d)| d)
                .collect();
            mean(&distances)
        })
        .collect()
}

/// `count * (1 + normalized area)`, areas min-max normalized (1.0 when all equal)
pub fn weighted_accessibility(collection: &BuildingCollection, counts: &[usize]) -> Vec<f64> {
    let areas: Vec<f64> = collection.records().map(|r| r.area_m2).collect();
    min_max_normalize(&areas, 1.0)
        .into_iter()
        .zip(counts)
        .map(|(area, &count)| count as f64 * (1.0 + area))
        .collect()
}

/// Every accessibility score, one record per building in table order
pub fn calculate_accessibility(
    collection: &BuildingCollection,
    graph: &ProximityGraph,
    config: &AccessibilityConfig,
) -> Result<Vec<AccessibilityRecord>, NetworkError> {
    collection.validate()?;
    let threshold_m = config.threshold_m;
    if !threshold_m.is_finite() || threshold_m < 0.0 {
        return Err(NetworkError::InvalidThreshold(threshold_m));
    }

    let distance = distance_counts(collection, threshold_m);
    let network = network_reachable_counts(graph, threshold_m);
    let avg_path = average_path_distances(graph);
    let weighted = weighted_accessibility(collection, &distance);

    let records = collection
        .records()
        .enumerate()
        .map(|(i, record)| {
            // buildings missing from the graph reach nothing through it
            let node = graph.node_index(&record.building_id).map(|n| n.index());
            AccessibilityRecord {
                building_id: record.building_id.clone(),
                distance_count: distance[i],
                network_reachable_count: node.map_or(0, |n| network[n]),
                avg_path_distance_m: node.and_then(|n| avg_path[n]),
                weighted_accessibility: weighted[i],
            }
        })
        .collect::<Vec<_>>();

    log::info!("Calculated accessibility for {} buildings", records.len());
    Ok(records)
}

/// Means and best building of an accessibility table
#[derive(Debug, Clone, PartialEq)]
pub struct AccessibilitySummary {
    pub mean_distance_count: f64,
    pub mean_network_count: f64,
    /// Over buildings that reach anything
    pub mean_path_distance_m: Option<f64>,
    pub highest_weighted: Option<(String, f64)>,
}

impl AccessibilitySummary {
    pub fn compute(records: &[AccessibilityRecord]) -> Self {
        let distance: Vec<f64> = records.iter().map(|r| r.distance_count as f64).collect();
        let network: Vec<f64> = records
            .iter()
            .map(|r| r.network_reachable_count as f64)
            .collect();
        let paths: Vec<f64> = records.iter().filter_map(|r| r.avg_path_distance_m).collect();

        let highest_weighted = records
            .iter()
            .fold(None::<&AccessibilityRecord>, |best, r| match best {
                Some(b) if b.weighted_accessibility >= r.weighted_accessibility => Some(b),
                _ => Some(r),
            })
            .map(|r| (r.building_id.clone(), r.weighted_accessibility));

        AccessibilitySummary {
            mean_distance_count: mean(&distance).unwrap_or(0.0),
            mean_network_count: mean(&network).unwrap_or(0.0),
            mean_path_distance_m: mean(&paths),
            highest_weighted,
        }
    }

    pub fn log(&self, threshold_m: f64) {
        log::info!("Accessibility metrics summary:");
        log::info!(
            "  Average distance accessibility ({}m): {:.2}",
            threshold_m,
            self.mean_distance_count
        );
        log::info!("  Average network accessibility: {:.2}", self.mean_network_count);
        match self.mean_path_distance_m {
            Some(d) => log::info!("  Average path distance: {:.2}m", d),
            None => log::info!("  Average path distance: N/A (no connected buildings)"),
        }
        match &self.highest_weighted {
            Some((id, value)) => {
                log::info!("  Highest weighted accessibility: {} (value={:.2})", id, value)
            }
            None => log::info!("  Highest weighted accessibility: N/A"),
        }
    }
}

pub fn write_accessibility_csv<P: AsRef<Path>>(records: &[AccessibilityRecord], path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_accessibility_csv<P: AsRef<Path>>(path: P) -> Result<Vec<AccessibilityRecord>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open accessibility file {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<AccessibilityRecord>, _>>()
        .with_context(|| format!("Invalid accessibility file {}", path.display()))
}
