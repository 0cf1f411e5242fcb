pub mod citygml;
pub mod global_variables;
