pub mod catalog;
pub mod corrections;
pub mod extractor;
pub mod harvest;
pub mod images;
pub mod perceptual;
pub mod reconcile;

pub use catalog::{Catalog, CatalogError, Collection, SharedCatalog};
pub use harvest::{Harvest, HarvestReport};
