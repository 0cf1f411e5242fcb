pub mod accessibility;
pub mod centrality;
pub mod distance;
pub mod graph;
pub mod paths;

pub use accessibility::{AccessibilityRecord, AccessibilitySummary};
pub use centrality::NodeMetrics;
pub use distance::DistanceMethod;
pub use graph::{GraphDocument, GraphMethod, NetworkStats, ProximityGraph};
pub use paths::ShortestPaths;
