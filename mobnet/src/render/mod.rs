pub mod charts;

pub use charts::{render_all, ChartInputs};
