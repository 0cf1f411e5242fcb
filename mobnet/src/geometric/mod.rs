pub mod building;

pub use building::{Building, BuildingCollection, BuildingRecord, CollectionSummary};
