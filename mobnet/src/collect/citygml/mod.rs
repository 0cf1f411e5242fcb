//! CityGML reading: a small namespace-aware element tree and the building
//! extraction rules on top of it.

pub mod citygml_collect;
pub mod xml_tree;

pub use citygml_collect::{CityGmlCollect, ExtractedBuilding};
pub use xml_tree::XmlElement;

/// CityGML 2.0 namespaces
pub mod ns {
    pub const BLDG: &str = "http://www.opengis.net/citygml/building/2.0";
    pub const GML: &str = "http://www.opengis.net/gml";
    pub const GEN: &str = "http://www.opengis.net/citygml/generics/2.0";
}
