use lookbook_common::CatalogId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{kind} {id} is already owned by {owner}")]
    AlreadyOwned {
        kind: &'static str,
        id: String,
        owner: CatalogId,
    },

    #[error("{kind} {id} already exists")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Unknown key kind {key:?} in {collection} corrections")]
    UnknownKeyKind {
        collection: &'static str,
        key: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
