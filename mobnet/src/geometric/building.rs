use anyhow::{Context, Result};
use geo::{Area, Centroid, Coord, GeodesicArea, MapCoords, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::collect::citygml::{CityGmlCollect, ExtractedBuilding};
use crate::commons::basic_functions::ensure_parent_dir;
use crate::config::ExtractConfig;
use crate::error::NetworkError;
use crate::geo_core::{BoundingBox, GeoCore, WGS84_EPSG};

/// One row of the entity table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRecord {
    pub building_id: String,
    /// WGS84 longitude of the footprint centroid
    pub centroid_lon: f64,
    /// WGS84 latitude of the footprint centroid
    pub centroid_lat: f64,
    /// Footprint area in square meters
    pub area_m2: f64,
    pub height_m: Option<f64>,
    pub building_type: Option<String>,
    pub usage: Option<String>,
}

impl BuildingRecord {
    pub fn centroid(&self) -> Point<f64> {
        Point::new(self.centroid_lon, self.centroid_lat)
    }

    pub fn has_finite_centroid(&self) -> bool {
        self.centroid_lon.is_finite() && self.centroid_lat.is_finite()
    }

    /// Centroid within lon [-180, 180] and lat [-90, 90]
    pub fn has_wgs84_centroid(&self) -> bool {
        (-180.0..=180.0).contains(&self.centroid_lon) && (-90.0..=90.0).contains(&self.centroid_lat)
    }
}

/// Building with its attributes and WGS84 footprint
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub record: BuildingRecord,
    /// Absent when the table was loaded without its footprint file
    pub footprint: Option<Polygon<f64>>,
}

impl Building {
    /// Create a Building from a record, without footprint
    pub fn new(record: BuildingRecord) -> Self {
        Building {
            record,
            footprint: None,
        }
    }

    /// Normalize an extracted building: area in square meters, centroid and
    /// footprint in WGS84. Projected coordinates that cannot be transformed are
    /// an error; geographic ones are kept as they are.
    pub fn from_extracted(extracted: ExtractedBuilding, geo_core: &GeoCore) -> Result<Self> {
        let footprint = extracted.footprint;

        let area_m2 = if geo_core.is_geographic() {
            footprint.geodesic_area_unsigned()
        } else {
            footprint.unsigned_area()
        };

        let centroid = footprint
            .centroid()
            .with_context(|| format!("Building {} has an empty footprint", extracted.building_id))?;

        let (centroid, footprint) = match reproject(geo_core, centroid, &footprint) {
            Ok(projected) => projected,
            Err(e) if !geo_core.is_geographic() => {
                return Err(NetworkError::Reprojection {
                    building_id: extracted.building_id,
                    epsg: geo_core.get_epsg(),
                    reason: format!("{:#}", e),
                }
                .into());
            }
            Err(e) => {
                log::warn!(
                    "Could not transform building {} to WGS84, keeping source coordinates: {:#}",
                    extracted.building_id,
                    e
                );
                (centroid, footprint)
            }
        };

        Ok(Building {
            record: BuildingRecord {
                building_id: extracted.building_id,
                centroid_lon: centroid.x(),
                centroid_lat: centroid.y(),
                area_m2,
                height_m: extracted.height_m,
                building_type: extracted.building_type,
                usage: extracted.usage,
            },
            footprint: Some(footprint),
        })
    }

    pub fn id(&self) -> &str {
        &self.record.building_id
    }
}

fn reproject(
    geo_core: &GeoCore,
    centroid: Point<f64>,
    footprint: &Polygon<f64>,
) -> Result<(Point<f64>, Polygon<f64>)> {
    let epsg = geo_core.get_epsg();
    if epsg == WGS84_EPSG {
        return Ok((centroid, footprint.clone()));
    }

    let centroid = geo_core.to_wgs84(centroid)?;
    let footprint = footprint.try_map_coords(move |c| {
        GeoCore::transform_coords(epsg, WGS84_EPSG, c.x, c.y).map(|(x, y)| Coord { x, y })
    })?;
    Ok((centroid, footprint))
}

/// Summary of an entity table
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSummary {
    pub count: usize,
    pub area_min: f64,
    pub area_max: f64,
    /// Extent of the centroids (lon as x, lat as y)
    pub extent: Option<BoundingBox>,
}

impl CollectionSummary {
    pub fn log(&self) {
        log::info!("Buildings: {}", self.count);
        if self.count == 0 {
            return;
        }
        log::info!("Area range: {:.2} to {:.2} m²", self.area_min, self.area_max);
        if let Some(extent) = &self.extent {
            log::info!(
                "Centroid longitude range: {:.6} to {:.6}",
                extent.min_x,
                extent.max_x
            );
            log::info!(
                "Centroid latitude range: {:.6} to {:.6}",
                extent.min_y,
                extent.max_y
            );
        }
    }
}

/// Ordered collection of buildings (the entity table)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingCollection {
    pub buildings: Vec<Building>,
}

impl BuildingCollection {
    /// Create an empty BuildingCollection
    pub fn new() -> Self {
        BuildingCollection {
            buildings: Vec::new(),
        }
    }

    pub fn from_buildings(buildings: Vec<Building>) -> Self {
        BuildingCollection { buildings }
    }

    /// Add a building to the collection
    pub fn add_building(&mut self, building: Building) {
        self.buildings.push(building);
    }

    /// Get number of buildings
    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    /// Check if collection is empty
    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    /// Get a reference to the buildings vector
    pub fn buildings(&self) -> &Vec<Building> {
        &self.buildings
    }

    pub fn records(&self) -> impl Iterator<Item = &BuildingRecord> {
        self.buildings.iter().map(|b| &b.record)
    }

    /// Extract every building of a CityGML file
    pub fn from_citygml<P: AsRef<Path>>(path: P, config: &ExtractConfig) -> Result<Self> {
        let mut collect = CityGmlCollect::new(path.as_ref());
        collect.set_default_storey_height(config.default_storey_height);
        let collect = collect.run()?;
        let geo_core = collect.geo_core;

        let mut collection = BuildingCollection::new();
        for extracted in collect.into_buildings() {
            let id = extracted.building_id.clone();
            match Building::from_extracted(extracted, &geo_core) {
                Ok(building) => collection.add_building(building),
                Err(e) if matches!(
                    e.downcast_ref::<NetworkError>(),
                    Some(NetworkError::Reprojection { .. })
                ) =>
                {
                    return Err(e);
                }
                Err(e) => log::warn!("Skipping building {}: {:#}", id, e),
            }
        }
        Ok(collection)
    }

    /// Concatenate collections in order; an identifier seen twice is an error
    pub fn merge<I>(collections: I) -> Result<Self, NetworkError>
    where
        I: IntoIterator<Item = BuildingCollection>,
    {
        let mut merged = BuildingCollection::new();
        let mut seen = HashSet::new();
        for collection in collections {
            for building in collection.buildings {
                if !seen.insert(building.record.building_id.clone()) {
                    return Err(NetworkError::DuplicateBuildingId(building.record.building_id));
                }
                merged.add_building(building);
            }
        }
        Ok(merged)
    }

    /// Non-empty, finite lon/lat centroids, unique identifiers
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.is_empty() {
            return Err(NetworkError::EmptyDataset);
        }

        let mut seen = HashSet::with_capacity(self.len());
        for record in self.records() {
            if !record.has_finite_centroid() {
                return Err(NetworkError::MissingCoordinates {
                    building_id: record.building_id.clone(),
                    lon: record.centroid_lon,
                    lat: record.centroid_lat,
                });
            }
            if !record.has_wgs84_centroid() {
                return Err(NetworkError::CoordinatesOutOfRange {
                    building_id: record.building_id.clone(),
                    lon: record.centroid_lon,
                    lat: record.centroid_lat,
                });
            }
            if !seen.insert(record.building_id.as_str()) {
                return Err(NetworkError::DuplicateBuildingId(record.building_id.clone()));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> CollectionSummary {
        let areas: Vec<f64> = self.records().map(|r| r.area_m2).collect();
        let area_min = areas.iter().cloned().fold(f64::INFINITY, f64::min);
        let area_max = areas.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        CollectionSummary {
            count: self.len(),
            area_min,
            area_max,
            extent: BoundingBox::from_points(
                self.records().map(|r| (r.centroid_lon, r.centroid_lat)),
            ),
        }
    }

    /// Write the entity table
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent_dir(path)?;

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for record in self.records() {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read an entity table; footprints are not loaded
    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open building table {}", path.display()))?;

        let mut collection = BuildingCollection::new();
        for (row, result) in reader.deserialize::<BuildingRecord>().enumerate() {
            let record = result
                .with_context(|| format!("Invalid row {} in {}", row + 1, path.display()))?;
            collection.add_building(Building::new(record));
        }
        Ok(collection)
    }

    /// Read an entity table and its footprint file when present
    pub fn read_csv_with_footprints<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut collection = Self::read_csv(path.as_ref())?;
        let footprints = read_footprints_geojson(footprints_path(path.as_ref()))?;
        collection.attach_footprints(footprints);
        Ok(collection)
    }

    /// Set footprints by building id; returns the number attached
    pub fn attach_footprints(&mut self, mut footprints: HashMap<String, Polygon<f64>>) -> usize {
        let mut attached = 0;
        for building in &mut self.buildings {
            if let Some(footprint) = footprints.remove(building.id()) {
                building.footprint = Some(footprint);
                attached += 1;
            }
        }
        attached
    }

    /// Write footprints as a GeoJSON FeatureCollection
    pub fn write_footprints_geojson<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let features = self
            .buildings
            .iter()
            .filter_map(|b| b.footprint.as_ref().map(|f| footprint_feature(&b.record, f)))
            .collect();
        write_feature_collection(path, features)
    }
}

/// `<dir>/<stem>_footprints.geojson` for a table at `<dir>/<stem>.csv`
pub fn footprints_path<P: AsRef<Path>>(csv_path: P) -> PathBuf {
    let csv_path = csv_path.as_ref();
    let stem = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "buildings".to_string());
    csv_path.with_file_name(format!("{}_footprints.geojson", stem))
}

fn footprint_feature(record: &BuildingRecord, footprint: &Polygon<f64>) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("building_id".to_string(), record.building_id.clone().into());
    properties.insert("area_m2".to_string(), record.area_m2.into());
    if let Some(height) = record.height_m {
        properties.insert("height_m".to_string(), height.into());
    }

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::from(footprint))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn write_feature_collection<P: AsRef<Path>>(path: P, features: Vec<Feature>) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    std::fs::write(path, GeoJson::from(collection).to_string())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Footprints by `building_id` property; a missing file gives an empty map
pub fn read_footprints_geojson<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Polygon<f64>>> {
    let path = path.as_ref();
    if !path.exists() {
        log::warn!("Footprint file not found: {}", path.display());
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let geojson: GeoJson = content
        .parse()
        .with_context(|| format!("Failed to parse GeoJSON {}", path.display()))?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        _ => anyhow::bail!("GeoJSON must be a Feature or FeatureCollection"),
    };

    let mut footprints = HashMap::new();
    for feature in features {
        let id = match feature.property("building_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                log::warn!("Skipping footprint feature without building_id");
                continue;
            }
        };
        match feature.geometry.as_ref().map(geojson_geometry_to_polygon) {
            Some(Ok(Some(polygon))) => {
                footprints.insert(id, polygon);
            }
            Some(Err(e)) => log::warn!("Failed to read footprint of {}: {:#}", id, e),
            _ => log::warn!("Footprint of {} is not a polygon", id),
        }
    }
    Ok(footprints)
}

/// Polygon, or first polygon of a MultiPolygon; None for other geometry types
fn geojson_geometry_to_polygon(geometry: &Geometry) -> Result<Option<Polygon<f64>>> {
    let geo_geom: geo::Geometry<f64> = geometry
        .try_into()
        .context("Failed to convert GeoJSON geometry to geo::Geometry")?;

    match geo_geom {
        geo::Geometry::Polygon(poly) => Ok(Some(poly)),
        geo::Geometry::MultiPolygon(mp) => Ok(mp.0.into_iter().next()),
        _ => Ok(None),
    }
}

/// Merge every `*_footprints.geojson` of a directory into one file.
/// Files are read in name order; a later file overrides an earlier one for the
/// same building id. Returns the number of footprints written.
pub fn combine_footprints<P: AsRef<Path>, Q: AsRef<Path>>(input_dir: P, output: Q) -> Result<usize> {
    let input_dir = input_dir.as_ref();
    let output = output.as_ref();

    let mut files: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to list {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().ends_with("_footprints.geojson"))
                .unwrap_or(false)
                && path != output
        })
        .collect();
    files.sort();

    if files.is_empty() {
        log::warn!("No footprint files found in {}", input_dir.display());
        return Ok(0);
    }
    log::info!("Found {} footprint files", files.len());

    let mut combined: Vec<(String, Polygon<f64>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for file in &files {
        log::info!("Loading {}", file.display());
        let mut footprints: Vec<(String, Polygon<f64>)> =
            read_footprints_geojson(file)?.into_iter().collect();
        footprints.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, polygon) in footprints {
            match index.get(&id) {
                Some(&i) => combined[i].1 = polygon,
                None => {
                    index.insert(id.clone(), combined.len());
                    combined.push((id, polygon));
                }
            }
        }
    }

    let features = combined
        .iter()
        .map(|(id, polygon)| {
            let mut properties = JsonObject::new();
            properties.insert("building_id".to_string(), id.clone().into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(polygon))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    write_feature_collection(output, features)?;

    log::info!("Combined {} footprints into {}", combined.len(), output.display());
    Ok(combined.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn record(id: &str, lon: f64, lat: f64, area: f64) -> BuildingRecord {
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

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    #[test]
    fn test_from_extracted_projected_area() {
        let extracted = ExtractedBuilding {
            building_id: "B1".to_string(),
            footprint: square(0.0, 0.0, 10.0),
            height_m: Some(6.0),
            building_type: Some("Building".to_string()),
            usage: None,
        };
        let result = Building::from_extracted(extracted, &GeoCore::new(5253));

        #[cfg(not(feature = "proj"))]
        {
            let err = result.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<NetworkError>(),
                Some(NetworkError::Reprojection { epsg: 5253, .. })
            ));
        }

        #[cfg(feature = "proj")]
        {
            let building = result.unwrap();
            assert!((building.record.area_m2 - 100.0).abs() < 1e-9);
            assert_eq!(building.record.height_m, Some(6.0));
            assert!(building.record.has_wgs84_centroid());
        }
    }

    #[test]
    fn test_from_extracted_geographic_keeps_degrees() {
        // ETRS89 has no transform without proj; degrees are usable as they are
        let extracted = ExtractedBuilding {
            building_id: "E1".to_string(),
            footprint: square(32.85, 39.92, 0.0001),
            height_m: None,
            building_type: None,
            usage: None,
        };
        let building = Building::from_extracted(extracted, &GeoCore::new(4258)).unwrap();
        assert!(building.record.has_wgs84_centroid());
        assert!((building.record.centroid_lon - 32.85005).abs() < 1e-3);
    }

    #[test]
    fn test_from_extracted_geographic_area() {
        // 0.0001 x 0.0001 degree square near Ankara, about 11.1 m x 8.5 m
        let extracted = ExtractedBuilding {
            building_id: "G1".to_string(),
            footprint: square(32.85, 39.92, 0.0001),
            height_m: None,
            building_type: None,
            usage: None,
        };
        let building = Building::from_extracted(extracted, &GeoCore::default()).unwrap();
        assert!(
            (building.record.area_m2 - 94.8).abs() < 1.0,
            "got {}",
            building.record.area_m2
        );
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            BuildingCollection::new().validate(),
            Err(NetworkError::EmptyDataset)
        ));

        let mut collection = BuildingCollection::new();
        collection.add_building(Building::new(record("A", 32.85, 39.92, 10.0)));
        assert!(collection.validate().is_ok());

        collection.add_building(Building::new(record("B", f64::NAN, 39.92, 10.0)));
        assert!(matches!(
            collection.validate(),
            Err(NetworkError::MissingCoordinates { .. })
        ));

        let duplicated = BuildingCollection::from_buildings(vec![
            Building::new(record("A", 32.85, 39.92, 10.0)),
            Building::new(record("A", 32.86, 39.92, 10.0)),
        ]);
        assert!(matches!(
            duplicated.validate(),
            Err(NetworkError::DuplicateBuildingId(id)) if id == "A"
        ));

        // projected meters left in the lon/lat columns
        let projected = BuildingCollection::from_buildings(vec![
            Building::new(record("P1", 500005.0, 4420005.0, 100.0)),
            Building::new(record("P2", 500105.0, 4420005.0, 100.0)),
        ]);
        assert!(matches!(
            projected.validate(),
            Err(NetworkError::CoordinatesOutOfRange { building_id, .. }) if building_id == "P1"
        ));
    }

    #[test]
    fn test_merge_keeps_order_and_rejects_duplicates() {
        let first = BuildingCollection::from_buildings(vec![Building::new(record("A", 0.0, 0.0, 1.0))]);
        let second = BuildingCollection::from_buildings(vec![
            Building::new(record("B", 0.0, 0.0, 1.0)),
            Building::new(record("C", 0.0, 0.0, 1.0)),
        ]);
        let merged = BuildingCollection::merge(vec![first.clone(), second]).unwrap();
        let ids: Vec<&str> = merged.buildings().iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        assert!(BuildingCollection::merge(vec![first.clone(), first]).is_err());
    }

    #[test]
    fn test_csv_and_footprints_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("buildings.csv");

        let mut with_height = record("A", 32.85, 39.92, 120.5);
        with_height.height_m = Some(9.0);
        with_height.usage = Some("C-42".to_string());
        let mut a = Building::new(with_height);
        a.footprint = Some(square(32.85, 39.92, 0.0001));
        let b = Building::new(record("B", 32.86, 39.93, 80.0));
        let collection = BuildingCollection::from_buildings(vec![a, b]);

        collection.write_csv(&csv_path).unwrap();
        collection
            .write_footprints_geojson(footprints_path(&csv_path))
            .unwrap();

        let header = std::fs::read_to_string(&csv_path).unwrap();
        assert!(header.starts_with(
            "building_id,centroid_lon,centroid_lat,area_m2,height_m,building_type,usage"
        ));

        let loaded = BuildingCollection::read_csv_with_footprints(&csv_path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.buildings[0].record, collection.buildings[0].record);
        assert_eq!(loaded.buildings[1].record.height_m, None);
        assert!(loaded.buildings[0].footprint.is_some());
        assert!(loaded.buildings[1].footprint.is_none());
    }

    #[test]
    fn test_footprints_path() {
        assert_eq!(
            footprints_path("data/processed/all_buildings.csv"),
            PathBuf::from("data/processed/all_buildings_footprints.geojson")
        );
    }

    #[test]
    fn test_missing_footprint_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = read_footprints_geojson(dir.path().join("nope.geojson")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_combine_footprints() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Building::new(record("A", 0.0, 0.0, 1.0));
        a.footprint = Some(square(0.0, 0.0, 1.0));
        let mut b = Building::new(record("B", 0.0, 0.0, 1.0));
        b.footprint = Some(square(5.0, 5.0, 1.0));
        BuildingCollection::from_buildings(vec![a])
            .write_footprints_geojson(dir.path().join("one_footprints.geojson"))
            .unwrap();
        BuildingCollection::from_buildings(vec![b])
            .write_footprints_geojson(dir.path().join("two_footprints.geojson"))
            .unwrap();

        let output = dir.path().join("combined").join("all_footprints.geojson");
        let count = combine_footprints(dir.path(), &output).unwrap();
        assert_eq!(count, 2);
        let combined = read_footprints_geojson(&output).unwrap();
        assert!(combined.contains_key("A") && combined.contains_key("B"));
    }

    #[test]
    fn test_summary() {
        let collection = BuildingCollection::from_buildings(vec![
            Building::new(record("A", 32.85, 39.92, 50.0)),
            Building::new(record("B", 32.86, 39.93, 150.0)),
        ]);
        let summary = collection.summary();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.area_min, 50.0);
        assert_eq!(summary.area_max, 150.0);
        let extent = summary.extent.unwrap();
        assert_eq!(extent.min_x, 32.85);
        assert_eq!(extent.max_y, 39.93);
    }
}
