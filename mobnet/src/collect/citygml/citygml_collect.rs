use anyhow::{Context, Result};
use geo::{Coord, LineString, Polygon};
use std::path::{Path, PathBuf};

use super::ns::{BLDG, GEN, GML};
use super::xml_tree::XmlElement;
use crate::collect::global_variables::DEFAULT_STOREY_HEIGHT_M;
use crate::geo_core::GeoCore;

/// A building as read from the file, footprint still in the source CRS
#[derive(Debug, Clone)]
pub struct ExtractedBuilding {
    pub building_id: String,
    pub footprint: Polygon<f64>,
    pub height_m: Option<f64>,
    pub building_type: Option<String>,
    pub usage: Option<String>,
}

/// CityGML file reader
/// Detects the CRS of the file and extracts every `bldg:Building` with a footprint
pub struct CityGmlCollect {
    /// Source file
    path: PathBuf,
    /// Prefix of generated ids for buildings without `gml:id`
    id_prefix: Option<String>,
    /// CRS detected from the file
    pub geo_core: GeoCore,
    /// Height of a storey when only `storeysAboveGround` is given
    default_storey_height: f64,
    /// Extracted buildings, in document order
    buildings: Vec<ExtractedBuilding>,
}

impl CityGmlCollect {
    /// Create a new reader for a CityGML file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let id_prefix = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());

        CityGmlCollect {
            path,
            id_prefix,
            geo_core: GeoCore::default(),
            default_storey_height: DEFAULT_STOREY_HEIGHT_M,
            buildings: Vec::new(),
        }
    }

    /// Set default storey height
    pub fn set_default_storey_height(&mut self, height: f64) {
        self.default_storey_height = height;
    }

    /// Read and parse the file, then extract buildings
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    /// Internal run method that can be called mutably
    pub fn run_internal(&mut self) -> Result<()> {
        log::info!("Parsing CityGML file: {}", self.path.display());

        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read CityGML file: {}", self.path.display()))?;
        let root = XmlElement::parse_bytes(&bytes)
            .with_context(|| format!("Failed to parse XML in {}", self.path.display()))?;

        self.extract_from_root(&root);

        log::info!("Extracted {} buildings", self.buildings.len());
        Ok(())
    }

    /// Extract from an in-memory document (id prefix taken from `name`)
    pub fn from_str(xml: &str, name: &str) -> Result<Self> {
        let mut collect = CityGmlCollect::new(name);
        let root = XmlElement::parse_str(xml).context("Failed to parse CityGML document")?;
        collect.extract_from_root(&root);
        Ok(collect)
    }

    fn extract_from_root(&mut self, root: &XmlElement) {
        self.geo_core = Self::detect_crs(root);

        let building_elements = root.find_all(BLDG, "Building");
        if building_elements.is_empty() {
            log::warn!("No buildings found in {}", self.path.display());
            return;
        }
        log::info!("Found {} building elements", building_elements.len());

        self.buildings.clear();
        for (idx, element) in building_elements.into_iter().enumerate() {
            match self.extract_building(element, idx) {
                Ok(Some(building)) => self.buildings.push(building),
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Error extracting building {}: {:#}", idx, e);
                    continue;
                }
            }
        }
    }

    /// CRS from `gml:boundedBy/gml:Envelope/@srsName`, overridden by the first
    /// `gml:pos/@srsName`; WGS84 when neither is present
    pub fn detect_crs(root: &XmlElement) -> GeoCore {
        let mut geo_core = GeoCore::default();

        if let Some(srs_name) = root
            .find(GML, "boundedBy")
            .and_then(|bounded_by| bounded_by.child(GML, "Envelope"))
            .and_then(|envelope| envelope.attr("srsName"))
        {
            geo_core = GeoCore::from_srs_name(srs_name);
            log::info!("Detected CRS: EPSG:{}", geo_core.get_epsg());
        }

        if let Some(srs_name) = root.find(GML, "pos").and_then(|pos| pos.attr("srsName")) {
            geo_core = GeoCore::from_srs_name(srs_name);
            log::info!("Detected CRS from pos: EPSG:{}", geo_core.get_epsg());
        }

        geo_core
    }

    fn extract_building(
        &self,
        element: &XmlElement,
        idx: usize,
    ) -> Result<Option<ExtractedBuilding>> {
        let building_id = match element.attr("id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => match &self.id_prefix {
                Some(prefix) => format!("{}_building_{}", prefix, idx),
                None => format!("building_{}", idx),
            },
        };

        let footprint = match Self::extract_ground_surface(element)? {
            Some(footprint) => footprint,
            None => {
                log::warn!("No ground surface found for building {}", building_id);
                return Ok(None);
            }
        };

        Ok(Some(ExtractedBuilding {
            height_m: self.extract_height(element),
            building_type: Self::extract_building_type(element),
            usage: Self::extract_usage(element),
            building_id,
            footprint,
        }))
    }

    /// Footprint search order:
    /// lod0FootPrint (first MultiSurface member, then any polygon),
    /// GroundSurface (lod0FootPrint, then lod1FootPrint), then any polygon
    pub fn extract_ground_surface(element: &XmlElement) -> Result<Option<Polygon<f64>>> {
        if let Some(lod0) = element.find(BLDG, "lod0FootPrint") {
            if let Some(polygon) = lod0
                .find(GML, "MultiSurface")
                .and_then(|ms| ms.find(GML, "surfaceMember"))
                .and_then(|member| member.find(GML, "Polygon"))
            {
                return Self::parse_polygon(polygon);
            }
            if let Some(polygon) = lod0.find(GML, "Polygon") {
                return Self::parse_polygon(polygon);
            }
        }

        if let Some(ground) = element.find(BLDG, "GroundSurface") {
            for lod in ["lod0FootPrint", "lod1FootPrint"] {
                if let Some(polygon) = ground
                    .find(BLDG, lod)
                    .and_then(|footprint| footprint.find(GML, "Polygon"))
                {
                    return Self::parse_polygon(polygon);
                }
            }
        }

        match element.find(GML, "Polygon") {
            Some(polygon) => Self::parse_polygon(polygon),
            None => Ok(None),
        }
    }

    /// `gml:Polygon` to polygon; None when the exterior ring is missing or has
    /// fewer than 3 positions. Rings are closed by `Polygon::new`.
    pub fn parse_polygon(polygon: &XmlElement) -> Result<Option<Polygon<f64>>> {
        let exterior = match polygon
            .find(GML, "exterior")
            .and_then(|exterior| exterior.find(GML, "LinearRing"))
        {
            Some(ring) => ring,
            None => return Ok(None),
        };

        let coords = Self::ring_coordinates(exterior, polygon)?;
        if coords.len() < 3 {
            return Ok(None);
        }

        let mut interiors = Vec::new();
        for interior in polygon.children_named(GML, "interior") {
            if let Some(ring) = interior.find(GML, "LinearRing") {
                let ring_coords = Self::ring_coordinates(ring, polygon)?;
                if ring_coords.len() >= 3 {
                    interiors.push(LineString::from(ring_coords));
                }
            }
        }

        Ok(Some(Polygon::new(LineString::from(coords), interiors)))
    }

    /// Positions of a `gml:LinearRing`, from `gml:posList` or `gml:pos` children.
    /// Z values are dropped.
    fn ring_coordinates(ring: &XmlElement, polygon: &XmlElement) -> Result<Vec<Coord<f64>>> {
        if let Some(pos_list) = ring.find(GML, "posList") {
            let values = parse_numbers(pos_list.text().unwrap_or(""))?;

            let dimension = pos_list
                .attr("srsDimension")
                .or_else(|| ring.attr("srsDimension"))
                .or_else(|| polygon.attr("srsDimension"))
                .and_then(|d| d.trim().parse::<usize>().ok())
                .filter(|d| *d >= 2)
                .or_else(|| infer_dimension(&values));

            if let Some(dimension) = dimension {
                let coords: Vec<Coord<f64>> = values
                    .chunks_exact(dimension)
                    .map(|chunk| Coord {
                        x: chunk[0],
                        y: chunk[1],
                    })
                    .collect();
                if !coords.is_empty() {
                    return Ok(coords);
                }
            }
        }

        let mut coords = Vec::new();
        for pos in ring.find_all(GML, "pos") {
            let values = parse_numbers(pos.text().unwrap_or(""))?;
            if values.len() >= 2 {
                coords.push(Coord {
                    x: values[0],
                    y: values[1],
                });
            }
        }
        Ok(coords)
    }

    /// Height from `buildingHeight`, `measuredHeight`, or storeys × storey height
    fn extract_height(&self, element: &XmlElement) -> Option<f64> {
        if let Some(height) = generic_attribute(element, "doubleAttribute", "buildingHeight")
            .and_then(|value| value.parse::<f64>().ok())
        {
            return Some(height);
        }

        if let Some(height) = element
            .find(BLDG, "measuredHeight")
            .and_then(|e| e.text())
            .and_then(|value| value.parse::<f64>().ok())
        {
            return Some(height);
        }

        element
            .find(BLDG, "storeysAboveGround")
            .and_then(|e| e.text())
            .and_then(|value| value.parse::<f64>().ok())
            .map(|storeys| storeys * self.default_storey_height)
    }

    fn extract_building_type(element: &XmlElement) -> Option<String> {
        if let Some(value) = generic_attribute(element, "intAttribute", "buildingType") {
            return Some(value.to_string());
        }

        if let Some(class) = element.find(BLDG, "class").and_then(|e| e.text()) {
            let translated = match class {
                "MimariBina" | "Mimari Bina" => "ArchitecturalBuilding",
                "Yapı" | "Bina" => "Building",
                other => other,
            };
            return Some(translated.to_string());
        }

        if let Some(function) = element.find(BLDG, "function") {
            if let Some(code) = function.attr("code").or_else(|| function.text()) {
                return Some(code.to_string());
            }
        }

        element
            .find(BLDG, "usage")
            .and_then(|usage| usage.attr("code"))
            .map(|code| code.to_string())
    }

    fn extract_usage(element: &XmlElement) -> Option<String> {
        if let Some(value) = generic_attribute(element, "stringAttribute", "constructionID") {
            return Some(value.to_string());
        }

        if let Some(name) = element.find(GML, "name").and_then(|e| e.text()) {
            let translated = match name {
                "Mimari Bina" | "MimariBina" => "Architectural Building",
                other => other,
            };
            return Some(translated.to_string());
        }

        element
            .find(BLDG, "usage")
            .and_then(|usage| usage.text())
            .map(|text| text.to_string())
    }

    /// Get extracted buildings
    pub fn buildings(&self) -> &[ExtractedBuilding] {
        &self.buildings
    }

    pub fn into_buildings(self) -> Vec<ExtractedBuilding> {
        self.buildings
    }
}

/// Value of the first `gen:<kind>[@name=name]/gen:value`
fn generic_attribute<'a>(element: &'a XmlElement, kind: &str, name: &str) -> Option<&'a str> {
    element
        .descendants()
        .filter(|e| e.is(GEN, kind) && e.attr("name") == Some(name))
        .find_map(|e| e.child(GEN, "value"))
        .and_then(|value| value.text())
}

fn parse_numbers(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .with_context(|| format!("Invalid coordinate value: {:?}", token))
        })
        .collect()
}

/// Coordinate dimension of a posList without `srsDimension`:
/// a ring that closes on itself as 3D triples is 3D, otherwise 2D when possible
fn infer_dimension(values: &[f64]) -> Option<usize> {
    let n = values.len();
    let closes = |dim: usize| {
        n % dim == 0 && n / dim >= 4 && values[0] == values[n - dim] && values[1] == values[n - dim + 1]
    };

    if closes(3) && !closes(2) {
        Some(3)
    } else if n % 2 == 0 && n > 0 {
        Some(2)
    } else if n % 3 == 0 && n > 0 {
        Some(3)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn wrap(buildings: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0"
    xmlns:bldg="http://www.opengis.net/citygml/building/2.0"
    xmlns:gen="http://www.opengis.net/citygml/generics/2.0"
    xmlns:gml="http://www.opengis.net/gml">
  <gml:boundedBy>
    <gml:Envelope srsName="EPSG:5253" srsDimension="3">
      <gml:lowerCorner>0 0 0</gml:lowerCorner>
      <gml:upperCorner>100 100 10</gml:upperCorner>
    </gml:Envelope>
  </gml:boundedBy>
  {}
</core:CityModel>"#,
            buildings
        )
    }

    const TURKISH_BUILDING: &str = r#"
  <core:cityObjectMember>
    <bldg:Building gml:id="BLD_001">
      <gml:name>Mimari Bina</gml:name>
      <gen:doubleAttribute name="buildingHeight"><gen:value>9.5</gen:value></gen:doubleAttribute>
      <gen:intAttribute name="buildingType"><gen:value>3</gen:value></gen:intAttribute>
      <gen:stringAttribute name="constructionID"><gen:value>C-42</gen:value></gen:stringAttribute>
      <bldg:lod0FootPrint>
        <gml:MultiSurface>
          <gml:surfaceMember>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:posList srsDimension="3">0 0 0 10 0 0 10 20 0 0 20 0 0 0 0</gml:posList>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </gml:surfaceMember>
        </gml:MultiSurface>
      </bldg:lod0FootPrint>
    </bldg:Building>
  </core:cityObjectMember>"#;

    #[test]
    fn test_detects_crs_from_envelope() {
        let collect = CityGmlCollect::from_str(&wrap(TURKISH_BUILDING), "ankara").unwrap();
        assert_eq!(collect.geo_core.get_epsg(), 5253);
    }

    #[test]
    fn test_turkish_generic_attributes() {
        let collect = CityGmlCollect::from_str(&wrap(TURKISH_BUILDING), "ankara").unwrap();
        let buildings = collect.buildings();
        assert_eq!(buildings.len(), 1);
        let b = &buildings[0];
        assert_eq!(b.building_id, "BLD_001");
        assert_eq!(b.height_m, Some(9.5));
        assert_eq!(b.building_type.as_deref(), Some("3"));
        assert_eq!(b.usage.as_deref(), Some("C-42"));
        assert!((b.footprint.unsigned_area() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_ground_surface_and_fallback_id() {
        let building = r#"
  <core:cityObjectMember>
    <bldg:Building>
      <bldg:class>MimariBina</bldg:class>
      <bldg:storeysAboveGround>4</bldg:storeysAboveGround>
      <bldg:boundedBy>
        <bldg:GroundSurface>
          <bldg:lod1FootPrint>
            <gml:Polygon>
              <gml:exterior>
                <gml:LinearRing>
                  <gml:pos>0 0</gml:pos>
                  <gml:pos>4 0</gml:pos>
                  <gml:pos>4 4</gml:pos>
                  <gml:pos>0 4</gml:pos>
                </gml:LinearRing>
              </gml:exterior>
            </gml:Polygon>
          </bldg:lod1FootPrint>
        </bldg:GroundSurface>
      </bldg:boundedBy>
    </bldg:Building>
  </core:cityObjectMember>"#;
        let collect = CityGmlCollect::from_str(&wrap(building), "parcel_7").unwrap();
        let b = &collect.buildings()[0];
        assert_eq!(b.building_id, "parcel_7_building_0");
        assert_eq!(b.height_m, Some(12.0));
        assert_eq!(b.building_type.as_deref(), Some("ArchitecturalBuilding"));
        assert!(b.usage.is_none());
        // open ring is closed
        assert_eq!(b.footprint.exterior().0.len(), 5);
        assert!((b.footprint.unsigned_area() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_building_without_footprint_is_skipped() {
        let building = r#"
  <core:cityObjectMember>
    <bldg:Building gml:id="NO_GEOM"><bldg:measuredHeight>5</bldg:measuredHeight></bldg:Building>
  </core:cityObjectMember>"#;
        let collect = CityGmlCollect::from_str(&wrap(building), "x").unwrap();
        assert!(collect.buildings().is_empty());
    }

    #[test]
    fn test_bad_coordinate_skips_only_that_building() {
        let broken = r#"
  <core:cityObjectMember>
    <bldg:Building gml:id="BROKEN">
      <gml:Polygon><gml:exterior><gml:LinearRing>
        <gml:posList>0 0 1 abc 1 1 0 1</gml:posList>
      </gml:LinearRing></gml:exterior></gml:Polygon>
    </bldg:Building>
  </core:cityObjectMember>"#;
        let collect =
            CityGmlCollect::from_str(&wrap(&format!("{}{}", broken, TURKISH_BUILDING)), "x")
                .unwrap();
        let ids: Vec<&str> = collect
            .buildings()
            .iter()
            .map(|b| b.building_id.as_str())
            .collect();
        assert_eq!(ids, vec!["BLD_001"]);
    }

    #[test]
    fn test_infer_dimension() {
        // closed 3D ring of 4 positions
        let ring_3d = [0.0, 0.0, 5.0, 1.0, 0.0, 5.0, 1.0, 1.0, 5.0, 0.0, 0.0, 5.0];
        assert_eq!(infer_dimension(&ring_3d), Some(3));
        let ring_2d = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        assert_eq!(infer_dimension(&ring_2d), Some(2));
        assert_eq!(infer_dimension(&[1.0]), None);
    }

    #[test]
    fn test_default_crs_is_wgs84() {
        let doc = r#"<core:CityModel xmlns:core="http://www.opengis.net/citygml/2.0"/>"#;
        let collect = CityGmlCollect::from_str(doc, "empty").unwrap();
        assert_eq!(collect.geo_core.get_epsg(), 4326);
        assert!(collect.buildings().is_empty());
    }
}
