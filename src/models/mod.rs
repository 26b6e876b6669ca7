pub mod info;
pub mod registry;

pub use info::{ModelCategory, ModelInfo};
pub use registry::{reference_id, CatalogEntry, ModelRegistry};
