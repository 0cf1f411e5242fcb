pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod network;
pub mod pipeline;
pub mod render;

pub use error::NetworkError;
