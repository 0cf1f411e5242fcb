use anyhow::Result;
use plotters::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::commons::basic_functions::{ensure_parent_dir, min_max_normalize, truncate_label};
use crate::config::RenderConfig;
use crate::geo_core::BoundingBox;
use crate::geometric::BuildingCollection;
use crate::network::{AccessibilityRecord, NodeMetrics, ProximityGraph, ShortestPaths};

const NETWORK_GRAPH_SVG: &str = "network_graph.svg";
const ACCESSIBILITY_HEATMAP_SVG: &str = "accessibility_heatmap.svg";
const OPTIMAL_PATHS_SVG: &str = "optimal_paths.svg";
const DEGREE_DISTRIBUTION_SVG: &str = "degree_distribution.svg";
const CENTRALITY_COMPARISON_SVG: &str = "centrality_comparison.svg";

const EDGE_GRAY: RGBColor = RGBColor(128, 128, 128);

/// Everything the charts can draw from; optional parts enable their charts
pub struct ChartInputs<'a> {
    pub graph: &'a ProximityGraph,
    pub buildings: Option<&'a BuildingCollection>,
    pub metrics: Option<&'a [NodeMetrics]>,
    pub accessibility: Option<&'a [AccessibilityRecord]>,
    pub paths: Option<&'a ShortestPaths>,
}

/// Draw every chart whose inputs are present into `output_dir`
pub fn render_all<P: AsRef<Path>>(
    inputs: &ChartInputs,
    output_dir: P,
    config: &RenderConfig,
) -> Result<Vec<PathBuf>> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    let path = output_dir.join(NETWORK_GRAPH_SVG);
    log::info!("Creating network graph visualization...");
    plot_network_graph(inputs.graph, inputs.metrics, &path, config)?;
    written.push(path);

    match (inputs.buildings, inputs.accessibility) {
        (Some(buildings), Some(records)) => {
            let path = output_dir.join(ACCESSIBILITY_HEATMAP_SVG);
            log::info!("Creating accessibility heatmap...");
            plot_accessibility_heatmap(buildings, records, &path, config)?;
            written.push(path);
        }
        _ => log::info!("No accessibility metrics, skipping accessibility heatmap"),
    }

    match inputs.paths {
        Some(paths) => {
            let path = output_dir.join(OPTIMAL_PATHS_SVG);
            log::info!("Creating optimal paths visualization...");
            plot_optimal_paths(inputs.graph, paths, &path, config)?;
            written.push(path);
        }
        None => log::info!("No shortest paths, skipping optimal paths chart"),
    }

    let path = output_dir.join(DEGREE_DISTRIBUTION_SVG);
    log::info!("Creating degree distribution plot...");
    plot_degree_distribution(inputs.graph, &path, config)?;
    written.push(path);

    match inputs.metrics {
        Some(metrics) if !metrics.is_empty() => {
            let path = output_dir.join(CENTRALITY_COMPARISON_SVG);
            log::info!("Creating centrality comparison plot...");
            plot_centrality_comparison(metrics, &path, config)?;
            written.push(path);
        }
        _ => log::info!("No centrality metrics, skipping centrality comparison"),
    }

    for path in &written {
        log::info!("Saved {}", path.display());
    }
    Ok(written)
}

/// Linear interpolation over evenly spaced color stops, `t` in [0, 1]
fn gradient(stops: &[(u8, u8, u8)], t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.5 };
    let scaled = t * (stops.len() - 1) as f64;
    let i = (scaled.floor() as usize).min(stops.len() - 2);
    let f = scaled - i as f64;
    let (a, b) = (stops[i], stops[i + 1]);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * f).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

fn viridis(t: f64) -> RGBColor {
    gradient(
        &[(68, 1, 84), (59, 82, 139), (33, 145, 140), (94, 201, 98), (253, 231, 37)],
        t,
    )
}

fn red_yellow_green(t: f64) -> RGBColor {
    gradient(&[(215, 48, 39), (254, 224, 139), (26, 152, 80)], t)
}

/// Evenly spaced hues for `count` series
fn palette(i: usize, count: usize) -> HSLColor {
    HSLColor(i as f64 / count.max(1) as f64, 0.75, 0.45)
}

/// Range with room around the data, never empty
fn axis_range(min: f64, max: f64) -> Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let pad = ((max - min) * 0.05).max(if max > min { 0.0 } else { 0.5 });
    (min - pad)..(max + pad)
}

fn map_extent<I: IntoIterator<Item = (f64, f64)>>(points: I) -> BoundingBox {
    BoundingBox::from_points(points)
        .unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 1.0, 1.0))
        .padded(0.05, 1e-4)
}

fn node_positions(graph: &ProximityGraph) -> Vec<(f64, f64)> {
    graph
        .nodes()
        .map(|v| {
            let record = graph.record(v);
            (record.centroid_lon, record.centroid_lat)
        })
        .collect()
}

/// Nodes at their centroid, size by degree, color by betweenness (viridis),
/// edge width by weight
pub fn plot_network_graph(
    graph: &ProximityGraph,
    metrics: Option<&[NodeMetrics]>,
    path: &Path,
    config: &RenderConfig,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let positions = node_positions(graph);
    let extent = map_extent(positions.iter().copied());

    let by_id: HashMap<&str, &NodeMetrics> = metrics
        .unwrap_or(&[])
        .iter()
        .map(|m| (m.building_id.as_str(), m))
        .collect();
    let degrees: Vec<f64> = graph.nodes().map(|v| graph.degree(v) as f64).collect();
    let sizes = min_max_normalize(&degrees, 0.5);
    let betweenness: Vec<f64> = graph
        .nodes()
        .map(|v| {
            by_id
                .get(graph.id(v))
                .map_or(0.0, |m| m.betweenness_centrality)
        })
        .collect();
    let colors = if by_id.is_empty() {
        vec![0.5; betweenness.len()]
    } else {
        min_max_normalize(&betweenness, 0.5)
    };

    let weights: Vec<f64> = graph.edges().map(|(_, _, w)| w).collect();
    let widths = min_max_normalize(&weights, 1.0 / 3.0);

    let root = SVGBackend::new(path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Building Network Graph (color: betweenness centrality)",
            ("sans-serif", 24),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(extent.min_x..extent.max_x, extent.min_y..extent.max_y)?;

    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .light_line_style(WHITE)
        .draw()?;

    let graph_ref = graph.graph();
    chart.draw_series(graph_ref.edge_indices().zip(&widths).filter_map(|(e, t)| {
        let (a, b) = graph_ref.edge_endpoints(e)?;
        let width = (1.0 + t * 3.0).round() as u32;
        Some(PathElement::new(
            vec![positions[a.index()], positions[b.index()]],
            EDGE_GRAY.mix(0.5).stroke_width(width),
        ))
    }))?;

    chart.draw_series(positions.iter().enumerate().map(|(i, &p)| {
        let radius = (4.0 + sizes[i] * 10.0).round() as i32;
        Circle::new(p, radius, viridis(colors[i]).mix(0.8).filled())
    }))?;
    chart.draw_series(positions.iter().enumerate().map(|(i, &p)| {
        let radius = (4.0 + sizes[i] * 10.0).round() as i32;
        Circle::new(p, radius, BLACK.stroke_width(1))
    }))?;

    if graph.node_count() <= config.labelled_nodes_max {
        chart.draw_series(graph.nodes().map(|v| {
            Text::new(
                truncate_label(graph.id(v), config.label_max_chars),
                positions[v.index()],
                ("sans-serif", 12.0),
            )
        }))?;
    }

    root.present()?;
    Ok(())
}

/// Centroids colored by weighted accessibility (red to green), size by area
pub fn plot_accessibility_heatmap(
    buildings: &BuildingCollection,
    records: &[AccessibilityRecord],
    path: &Path,
    config: &RenderConfig,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let scores: HashMap<&str, f64> = records
        .iter()
        .map(|r| (r.building_id.as_str(), r.weighted_accessibility))
        .collect();

    let points: Vec<((f64, f64), f64, f64)> = buildings
        .records()
        .map(|r| {
            (
                (r.centroid_lon, r.centroid_lat),
                scores.get(r.building_id.as_str()).copied().unwrap_or(0.0),
                r.area_m2,
            )
        })
        .collect();
    let extent = map_extent(points.iter().map(|(p, _, _)| *p));
    let colors = min_max_normalize(&points.iter().map(|(_, s, _)| *s).collect::<Vec<_>>(), 0.5);
    let sizes = min_max_normalize(&points.iter().map(|(_, _, a)| *a).collect::<Vec<_>>(), 0.5);

    let root = SVGBackend::new(path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Accessibility Heatmap (color: weighted accessibility)",
            ("sans-serif", 24),
        )
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(extent.min_x..extent.max_x, extent.min_y..extent.max_y)?;

    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .light_line_style(WHITE)
        .draw()?;

    chart.draw_series(points.iter().enumerate().map(|(i, (p, _, _))| {
        let radius = (5.0 + sizes[i] * 12.0).round() as i32;
        Circle::new(*p, radius, red_yellow_green(colors[i]).mix(0.7).filled())
    }))?;
    chart.draw_series(points.iter().enumerate().map(|(i, (p, _, _))| {
        let radius = (5.0 + sizes[i] * 12.0).round() as i32;
        Circle::new(*p, radius, BLACK.stroke_width(1))
    }))?;

    root.present()?;
    Ok(())
}

/// Graph in light gray with the first shortest paths highlighted
pub fn plot_optimal_paths(
    graph: &ProximityGraph,
    paths: &ShortestPaths,
    path: &Path,
    config: &RenderConfig,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let positions = node_positions(graph);
    let extent = map_extent(positions.iter().copied());

    let root = SVGBackend::new(path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Optimal Paths Between Buildings", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(extent.min_x..extent.max_x, extent.min_y..extent.max_y)?;

    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .light_line_style(WHITE)
        .draw()?;

    let graph_ref = graph.graph();
    chart.draw_series(graph_ref.edge_indices().filter_map(|e| {
        let (a, b) = graph_ref.edge_endpoints(e)?;
        Some(PathElement::new(
            vec![positions[a.index()], positions[b.index()]],
            EDGE_GRAY.mix(0.2).stroke_width(1),
        ))
    }))?;
    chart.draw_series(
        positions
            .iter()
            .map(|&p| Circle::new(p, 4, RGBColor(173, 216, 230).filled())),
    )?;

    let selected: Vec<(&str, &[String])> = paths.iter().take(config.paths_to_draw).collect();
    for (i, (key, nodes)) in selected.iter().enumerate() {
        let coords: Vec<(f64, f64)> = nodes
            .iter()
            .filter_map(|id| graph.node_index(id).map(|v| positions[v.index()]))
            .collect();
        if coords.len() < 2 {
            continue;
        }
        let color = palette(i, selected.len());
        chart
            .draw_series(LineSeries::new(coords, color.stroke_width(3)))?
            .label(key.to_string())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(3)));
    }

    if !selected.is_empty() {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

/// Histogram of node degrees
pub fn plot_degree_distribution(
    graph: &ProximityGraph,
    path: &Path,
    config: &RenderConfig,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let degrees: Vec<u32> = graph.nodes().map(|v| graph.degree(v) as u32).collect();
    let max_degree = degrees.iter().copied().max().unwrap_or(0);

    let mut counts: HashMap<u32, u32> = HashMap::new();
    for d in &degrees {
        *counts.entry(*d).or_default() += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);

    let root = SVGBackend::new(path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Degree Distribution", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0u32..max_degree + 1).into_segmented(), 0u32..max_count + 1)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .bold_line_style(WHITE.mix(0.3))
        .x_desc("Degree")
        .y_desc("Frequency")
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.7).filled())
            .margin(2)
            .data(degrees.iter().map(|d| (*d, 1))),
    )?;

    root.present()?;
    Ok(())
}

/// 2x2 panel: degree vs degree centrality, betweenness vs closeness,
/// PageRank bars, min-max normalized centralities per building
pub fn plot_centrality_comparison(
    metrics: &[NodeMetrics],
    path: &Path,
    config: &RenderConfig,
) -> Result<()> {
    ensure_parent_dir(path)?;
    let root = SVGBackend::new(path, (config.width, config.height)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    let column = |f: fn(&NodeMetrics) -> f64| -> Vec<f64> { metrics.iter().map(f).collect() };
    let degree = column(|m| m.degree as f64);
    let degree_centrality = column(|m| m.degree_centrality);
    let betweenness = column(|m| m.betweenness_centrality);
    let closeness = column(|m| m.closeness_centrality);
    let pagerank = column(|m| m.pagerank);

    let range_of = |values: &[f64]| {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        axis_range(min, max)
    };

    // degree vs degree centrality
    {
        let mut chart = ChartBuilder::on(&panels[0])
            .caption("Degree vs Degree Centrality", ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(50)
            .build_cartesian_2d(range_of(&degree), range_of(&degree_centrality))?;
        chart
            .configure_mesh()
            .x_desc("Degree")
            .y_desc("Degree Centrality")
            .draw()?;
        chart.draw_series(
            degree
                .iter()
                .zip(&degree_centrality)
                .map(|(&x, &y)| Circle::new((x, y), 4, BLUE.mix(0.7).filled())),
        )?;
    }

    // betweenness vs closeness
    {
        let mut chart = ChartBuilder::on(&panels[1])
            .caption("Betweenness vs Closeness", ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(50)
            .build_cartesian_2d(range_of(&betweenness), range_of(&closeness))?;
        chart
            .configure_mesh()
            .x_desc("Betweenness Centrality")
            .y_desc("Closeness Centrality")
            .draw()?;
        chart.draw_series(
            betweenness
                .iter()
                .zip(&closeness)
                .map(|(&x, &y)| Circle::new((x, y), 4, BLUE.mix(0.7).filled())),
        )?;
    }

    let n = metrics.len() as f64;

    // PageRank bars
    {
        let max_rank = pagerank.iter().cloned().fold(0.0, f64::max);
        let mut chart = ChartBuilder::on(&panels[2])
            .caption("PageRank Values", ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.5..n - 0.5, 0.0..(max_rank * 1.1).max(1e-6))?;
        chart
            .configure_mesh()
            .x_desc("Building Index")
            .y_desc("PageRank")
            .draw()?;
        chart.draw_series(pagerank.iter().enumerate().map(|(i, &rank)| {
            let x = i as f64;
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, rank)], BLUE.mix(0.7).filled())
        }))?;
    }

    // normalized centralities
    {
        let mut chart = ChartBuilder::on(&panels[3])
            .caption("Centrality Comparison", ("sans-serif", 18))
            .margin(10)
            .x_label_area_size(35)
            .y_label_area_size(50)
            .build_cartesian_2d(-0.5..n - 0.5, -0.05..1.05)?;
        chart
            .configure_mesh()
            .x_desc("Building Index")
            .y_desc("Normalized Centrality")
            .draw()?;

        let series: [(&str, &[f64]); 4] = [
            ("Degree", &degree_centrality),
            ("Betweenness", &betweenness),
            ("Closeness", &closeness),
            ("PageRank", &pagerank),
        ];
        for (i, (label, values)) in series.iter().enumerate() {
            let color = palette(i, series.len());
            let normalized = min_max_normalize(values, 0.0);
            let points: Vec<(f64, f64)> = normalized
                .iter()
                .enumerate()
                .map(|(x, &y)| (x as f64, y))
                .collect();
            chart
                .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))?
                .label(*label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
            chart.draw_series(
                points
                    .iter()
                    .map(|&p| Circle::new(p, 3, color.filled())),
            )?;
        }
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::network::accessibility::calculate_accessibility;
    use crate::network::centrality::compute_metrics;
    use crate::network::graph::build_distance_graph;
    use crate::network::graph::tests::{config, line};
    use crate::network::paths::compute_shortest_paths;

    #[test]
    fn test_gradient_endpoints() {
        assert_eq!(viridis(0.0), RGBColor(68, 1, 84));
        assert_eq!(viridis(1.0), RGBColor(253, 231, 37));
        assert_eq!(red_yellow_green(0.5), RGBColor(254, 224, 139));
        assert_eq!(red_yellow_green(f64::NAN), RGBColor(254, 224, 139));
    }

    #[test]
    fn test_axis_range_never_empty() {
        let r = axis_range(1.0, 1.0);
        assert!(r.start < r.end);
        let r = axis_range(0.0, 10.0);
        assert_eq!(r, -0.5..10.5);
    }

    #[test]
    fn test_render_all_writes_svgs() {
        let buildings = line(4);
        let graph = build_distance_graph(&buildings, &config(150.0)).unwrap();
        let metrics = compute_metrics(&graph, &AnalysisConfig::default());
        let records =
            calculate_accessibility(&buildings, &graph, &crate::config::AccessibilityConfig::default())
                .unwrap();
        let paths = compute_shortest_paths(&graph, 1000);

        let dir = tempfile::tempdir().unwrap();
        let inputs = ChartInputs {
            graph: &graph,
            buildings: Some(&buildings),
            metrics: Some(&metrics),
            accessibility: Some(&records),
            paths: Some(&paths),
        };
        let written = render_all(&inputs, dir.path(), &RenderConfig::default()).unwrap();
        assert_eq!(written.len(), 5);
        for path in written {
            let content = std::fs::read_to_string(&path).unwrap();
            assert!(content.contains("<svg"), "{} is not an SVG", path.display());
        }
    }

    #[test]
    fn test_render_skips_missing_inputs() {
        let buildings = line(2);
        let graph = build_distance_graph(&buildings, &config(10.0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let inputs = ChartInputs {
            graph: &graph,
            buildings: None,
            metrics: None,
            accessibility: None,
            paths: None,
        };
        let written = render_all(&inputs, dir.path(), &RenderConfig::default()).unwrap();
        let names: Vec<String> = written
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec![NETWORK_GRAPH_SVG, DEGREE_DISTRIBUTION_SVG]);
    }
}
