use thiserror::Error;

/// Domain failures of the extraction, graph and scoring stages.
///
/// I/O and parsing failures travel as `anyhow::Error` with context; these are
/// the conditions where the input itself is unusable and the run must stop.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("entity table is empty")]
    EmptyDataset,

    #[error("building {building_id} has a missing or non-finite centroid ({lon}, {lat})")]
    MissingCoordinates {
        building_id: String,
        lon: f64,
        lat: f64,
    },

    #[error("building {building_id} has a centroid outside WGS84 lon/lat bounds ({lon}, {lat})")]
    CoordinatesOutOfRange {
        building_id: String,
        lon: f64,
        lat: f64,
    },

    #[error("cannot transform building {building_id} from EPSG:{epsg} to WGS84: {reason}")]
    Reprojection {
        building_id: String,
        epsg: i32,
        reason: String,
    },

    #[error("building id {0} appears more than once")]
    DuplicateBuildingId(String),

    #[error("distance threshold must be finite and non-negative, got {0}")]
    InvalidThreshold(f64),

    #[error("unknown building id: {0}")]
    UnknownBuilding(String),

    #[error("PageRank did not converge within {0} iterations")]
    PageRankDidNotConverge(usize),
}
