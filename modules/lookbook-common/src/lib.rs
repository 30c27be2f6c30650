pub mod config;
pub mod entity;
pub mod error;
pub mod file_config;
pub mod types;

pub use config::Config;
pub use entity::{CatalogId, Entity, RESERVED_ID_BOUNDARY};
pub use error::LookbookError;
pub use file_config::{FetchConfig, FileConfig, MatcherConfig, PageConfig};
pub use types::*;
