use std::fs;
use std::path::{Path, PathBuf};

use mobnet::config::PipelineConfig;
use mobnet::geometric::building::read_footprints_geojson;
use mobnet::network::ProximityGraph;
use mobnet::pipeline;

fn square(x: f64, y: f64, d: f64) -> String {
    [
        (x - d, y - d),
        (x + d, y - d),
        (x + d, y + d),
        (x - d, y + d),
        (x - d, y - d),
    ]
    .iter()
    .map(|(x, y)| format!("{} {} 0", x, y))
    .collect::<Vec<_>>()
    .join(" ")
}

fn building(id: &str, lon: f64, lat: f64, height: f64) -> String {
    footprint_building(id, square(lon, lat, 0.0001), height)
}

fn footprint_building(id: &str, ring: String, height: f64) -> String {
    format!(
        r#"
  <core:cityObjectMember>
    <bldg:Building gml:id="{id}">
      <bldg:measuredHeight uom="m">{height}</bldg:measuredHeight>
      <bldg:lod0FootPrint>
        <gml:MultiSurface>
          <gml:surfaceMember>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:posList srsDimension="3">{ring}</gml:posList>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </bldg:lod0FootPrint>
    </bldg:Building>
  </core:cityObjectMember>"#,
        id = id,
        height = height,
        ring = ring
    )
}

fn write_city_model(path: &Path, buildings: &[String]) {
    write_city_model_in(path, "EPSG:4326", buildings)
}

fn write_city_model_in(path: &Path, srs_name: &str, buildings: &[String]) {
    let doc = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0"
    xmlns:bldg="http://www.opengis.net/citygml/building/2.0"
    xmlns:gml="http://www.opengis.net/gml">
  <gml:boundedBy>
    <gml:Envelope srsName="{srs_name}" srsDimension="3">
      <gml:lowerCorner>32.8 39.9 0</gml:lowerCorner>
      <gml:upperCorner>32.9 40.0 20</gml:upperCorner>
    </gml:Envelope>
  </gml:boundedBy>{members}
</core:CityModel>
"#,
        srs_name = srs_name,
        members = buildings.concat()
    );
    fs::write(path, doc).unwrap();
}

/// Two buildings 347.27 m apart along a meridian
fn two_buildings(dir: &Path) -> PathBuf {
    let input = dir.join("input");
    fs::create_dir_all(&input).unwrap();
    let gml = input.join("district.gml");
    write_city_model(
        &gml,
        &[
            building("A", 32.85, 39.92, 9.0),
            building("B", 32.85, 39.92312307, 12.0),
        ],
    );
    gml
}

#[test]
fn test_full_run_two_buildings() {
    let dir = tempfile::tempdir().unwrap();
    let gml = two_buildings(dir.path());
    let output = dir.path().join("output");

    let layout = pipeline::run(&[gml], &output, &PipelineConfig::default()).unwrap();
    assert_eq!(layout.processed_dir, dir.path().join("processed"));

    for file in [
        "district_buildings.csv",
        "district_buildings_footprints.geojson",
        "all_buildings.csv",
        "all_buildings_footprints.geojson",
        "building_network_graph.json",
        "building_network_graph_stats.json",
        "building_network_graph_edges.csv",
        "network_metrics.csv",
        "network_paths.json",
        "accessibility_metrics.csv",
    ] {
        assert!(layout.processed_dir.join(file).is_file(), "missing {}", file);
    }
    for chart in [
        "network_graph.svg",
        "accessibility_heatmap.svg",
        "optimal_paths.svg",
        "degree_distribution.svg",
        "centrality_comparison.svg",
    ] {
        assert!(output.join(chart).is_file(), "missing {}", chart);
    }

    let graph = ProximityGraph::load_json(layout.graph_json()).unwrap();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    let weight = graph.edge_weight("A", "B").unwrap();
    assert!((weight - 347.27).abs() < 0.05, "edge weight {}", weight);

    let metrics = fs::read_to_string(layout.metrics_csv()).unwrap();
    assert_eq!(metrics.lines().count(), 3);
}

#[test]
fn test_run_footprints_ignore_leftover_files() {
    let dir = tempfile::tempdir().unwrap();
    let gml = two_buildings(dir.path());
    let processed = dir.path().join("processed");
    fs::create_dir_all(&processed).unwrap();

    let leftover = dir.path().join("leftover.gml");
    write_city_model(&leftover, &[building("Z", 32.86, 39.92, 6.0)]);
    pipeline::extract(
        &leftover,
        &processed.join("old_buildings.csv"),
        &Default::default(),
    )
    .unwrap();
    assert!(processed.join("old_buildings_footprints.geojson").is_file());

    let layout = pipeline::run(&[gml], &dir.path().join("output"), &PipelineConfig::default()).unwrap();
    let footprints = read_footprints_geojson(
        layout.processed_dir.join("all_buildings_footprints.geojson"),
    )
    .unwrap();
    let mut ids: Vec<_> = footprints.keys().cloned().collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);
}

#[test]
fn test_threshold_below_distance_leaves_no_edge() {
    let dir = tempfile::tempdir().unwrap();
    let gml = two_buildings(dir.path());
    let processed = dir.path().join("processed");
    let csv = processed.join("buildings.csv");

    let buildings = pipeline::extract(&gml, &csv, &Default::default()).unwrap();
    assert_eq!(buildings.len(), 2);

    let config = mobnet::config::NetworkConfig {
        threshold_m: 300.0,
        ..Default::default()
    };
    let graph = pipeline::build(&csv, &processed.join("graph.json"), &config).unwrap();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 0);
    assert!(processed.join("graph_stats.json").is_file());
}

#[test]
fn test_duplicate_ids_across_files_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    write_city_model(&input.join("a.gml"), &[building("A", 32.85, 39.92, 9.0)]);
    write_city_model(&input.join("b.gml"), &[building("A", 32.86, 39.93, 9.0)]);

    let result = pipeline::run(&[input], &dir.path().join("output"), &PipelineConfig::default());
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("more than once"), "{}", message);
}

#[test]
fn test_missing_input_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let result = pipeline::run(
        &[dir.path().join("nowhere.gml")],
        &dir.path().join("output"),
        &PipelineConfig::default(),
    );
    assert!(result.is_err());
}

/// Two TUREF / TM27 buildings 100 m apart
fn projected_buildings(dir: &Path) -> PathBuf {
    let gml = dir.join("parcels.gml");
    write_city_model_in(
        &gml,
        "EPSG:5253",
        &[
            footprint_building("A", square(500_000.0, 4_420_000.0, 5.0), 9.0),
            footprint_building("B", square(500_100.0, 4_420_000.0, 5.0), 9.0),
        ],
    );
    gml
}

#[cfg(not(feature = "proj"))]
#[test]
fn test_projected_input_without_proj_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let gml = projected_buildings(dir.path());
    let csv = dir.path().join("processed").join("parcels.csv");

    let err = pipeline::extract(&gml, &csv, &Default::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("EPSG:5253"), "{:#}", err);
    assert!(!csv.exists());
}

#[cfg(feature = "proj")]
#[test]
fn test_projected_input_is_reprojected() {
    let dir = tempfile::tempdir().unwrap();
    let gml = projected_buildings(dir.path());
    let processed = dir.path().join("processed");
    let csv = processed.join("parcels.csv");

    let buildings = pipeline::extract(&gml, &csv, &Default::default()).unwrap();
    assert!(buildings.records().all(|r| r.has_wgs84_centroid()));

    let config = mobnet::config::NetworkConfig {
        threshold_m: 500.0,
        ..Default::default()
    };
    let graph = pipeline::build(&csv, &processed.join("graph.json"), &config).unwrap();
    assert_eq!(graph.edge_count(), 1);
    let weight = graph.edge_weight("A", "B").unwrap();
    assert!((weight - 100.0).abs() < 1.0, "edge weight {}", weight);
}
