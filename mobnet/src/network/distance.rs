use geo::{
    Centroid, Coord, EuclideanDistance, GeodesicDistance, HaversineDistance, MapCoords, Point,
    Polygon,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean earth radius used by geo's haversine, in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// How the distance between two centroids is measured
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMethod {
    /// Great-circle distance on the mean earth sphere
    #[default]
    Haversine,
    /// Distance on the WGS84 ellipsoid
    Geodesic,
    /// Planar distance, for projected coordinates
    Euclidean,
}

impl DistanceMethod {
    /// Distance between two lon/lat (or projected, for Euclidean) points
    pub fn distance_m(&self, a: Point<f64>, b: Point<f64>) -> f64 {
        match self {
            DistanceMethod::Haversine => haversine_m(a, b),
            DistanceMethod::Geodesic => geodesic_m(a, b),
            DistanceMethod::Euclidean => euclidean(a, b),
        }
    }
}

impl fmt::Display for DistanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMethod::Haversine => "haversine",
            DistanceMethod::Geodesic => "geodesic",
            DistanceMethod::Euclidean => "euclidean",
        };
        f.write_str(name)
    }
}

/// Great-circle distance in meters between two lon/lat points
pub fn haversine_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.haversine_distance(&b)
}

/// Ellipsoidal distance in meters between two lon/lat points
pub fn geodesic_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.geodesic_distance(&b)
}

pub fn euclidean(a: Point<f64>, b: Point<f64>) -> f64 {
    a.euclidean_distance(&b)
}

/// Minimum edge-to-edge distance in meters between two lon/lat polygons
/// (0 when they touch or overlap)
///
/// Both polygons are projected to an equirectangular frame centered between
/// them, accurate at building scale.
pub fn footprint_distance_m(p1: &Polygon<f64>, p2: &Polygon<f64>) -> f64 {
    let origin = match (p1.centroid(), p2.centroid()) {
        (Some(c1), Some(c2)) => Coord {
            x: (c1.x() + c2.x()) / 2.0,
            y: (c1.y() + c2.y()) / 2.0,
        },
        _ => return f64::INFINITY,
    };

    let local_1 = to_local_frame(p1, origin);
    let local_2 = to_local_frame(p2, origin);
    local_1.euclidean_distance(&local_2)
}

fn to_local_frame(polygon: &Polygon<f64>, origin: Coord<f64>) -> Polygon<f64> {
    let meters_per_degree = EARTH_RADIUS_M.to_radians();
    let lon_scale = meters_per_degree * origin.y.to_radians().cos();

    polygon.map_coords(|c| Coord {
        x: (c.x - origin.x) * lon_scale,
        y: (c.y - origin.y) * meters_per_degree,
    })
}
