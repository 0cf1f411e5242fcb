use anyhow::Result;
#[cfg(feature = "proj")]
use anyhow::Context;
use geo::Point;
#[cfg(feature = "proj")]
use proj::Proj;
use serde::{Deserialize, Serialize};

/// EPSG code of WGS84 longitude/latitude, the shared CRS of every entity table
pub const WGS84_EPSG: i32 = 4326;

/// Geographic (degree based) CRS codes seen in cadastral exports
const GEOGRAPHIC_EPSG: &[i32] = &[4326, 4258, 4269, 4937, 4979];

/// CRS holder for a dataset
/// Handles the source EPSG code of a file and reprojection to WGS84
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeoCore {
    /// EPSG code of the source coordinates
    pub epsg: i32,
}

impl Default for GeoCore {
    /// CityGML files without an `srsName` are read as WGS84
    fn default() -> Self {
        GeoCore::new(WGS84_EPSG)
    }
}

impl GeoCore {
    /// Create a new GeoCore with EPSG
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg }
    }

    /// Build a GeoCore from a GML `srsName`, falling back to WGS84
    pub fn from_srs_name(srs_name: &str) -> Self {
        match parse_epsg(srs_name) {
            Some(epsg) => GeoCore::new(epsg),
            None => {
                log::warn!("Unrecognised srsName {:?}, assuming EPSG:{}", srs_name, WGS84_EPSG);
                GeoCore::default()
            }
        }
    }

    /// Get EPSG code
    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    /// True when coordinates are degrees rather than projected meters
    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_EPSG.contains(&self.epsg)
    }

    /// Transform coordinates from one CRS to another
    #[cfg(feature = "proj")]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from_epsg == to_epsg {
            return Ok((x, y));
        }

        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        let proj = Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")?;

        let result = proj
            .convert((x, y))
            .context("Failed to transform coordinates")?;

        Ok(result)
    }

    /// Transform coordinates from one CRS to another
    #[cfg(not(feature = "proj"))]
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        if from_epsg == to_epsg {
            return Ok((x, y));
        }
        anyhow::bail!(
            "Transforming EPSG:{} to EPSG:{} requires the `proj` feature",
            from_epsg,
            to_epsg
        )
    }

    /// Transform a Point from one CRS to another
    pub fn transform_point(from_epsg: i32, to_epsg: i32, point: Point<f64>) -> Result<Point<f64>> {
        let (x, y) = Self::transform_coords(from_epsg, to_epsg, point.x(), point.y())?;
        Ok(Point::new(x, y))
    }

    /// Transform a point of this CRS to WGS84 lon/lat
    pub fn to_wgs84(&self, point: Point<f64>) -> Result<Point<f64>> {
        Self::transform_point(self.epsg, WGS84_EPSG, point)
    }
}

/// Extract an EPSG code from the srsName spellings found in GML files:
/// `EPSG:5253`, `urn:ogc:def:crs:EPSG::5253`, `urn:ogc:def:crs:EPSG:6.12:5253`,
/// `http://www.opengis.net/def/crs/EPSG/0/5253`, plus `WGS84` / `CRS84` aliases.
pub fn parse_epsg(srs_name: &str) -> Option<i32> {
    let trimmed = srs_name.trim();
    let upper = trimmed.to_ascii_uppercase();

    if upper.contains("EPSG") {
        // The code is always the last run of digits
        let digits: String = trimmed
            .rsplit(|c: char| !c.is_ascii_digit())
            .find(|part| !part.is_empty())?
            .to_string();
        return digits.parse().ok();
    }

    if upper.contains("WGS84") || upper.contains("WGS 84") || upper.contains("CRS84") {
        return Some(WGS84_EPSG);
    }

    None
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Smallest box holding every point, None for an empty input
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = BoundingBox::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow each side by `ratio` of the extent; degenerate sides get `min_pad`
    pub fn padded(&self, ratio: f64, min_pad: f64) -> Self {
        let pad_x = (self.width() * ratio).max(min_pad);
        let pad_y = (self.height() * ratio).max(min_pad);
        BoundingBox::new(
            self.min_x - pad_x,
            self.min_y - pad_y,
            self.max_x + pad_x,
            self.max_y + pad_y,
        )
    }
}
