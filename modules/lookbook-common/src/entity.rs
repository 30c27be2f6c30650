// Owner token and the trait every catalog entity implements.
//
// Entities only know the opaque `CatalogId` of the store holding them, never
// the concrete store type, so the collections can change without touching
// the entity definitions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// IDs at or above this value are reserved for manually curated entries and
/// never influence automatic ID allocation.
pub const RESERVED_ID_BOUNDARY: i32 = 900_000;

static NEXT_CATALOG_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one catalog store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogId(u64);

impl CatalogId {
    /// Allocate a token that no other store in this process shares.
    pub fn fresh() -> Self {
        Self(NEXT_CATALOG_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog#{}", self.0)
    }
}

/// A record held by exactly one catalog collection at a time.
pub trait Entity: Clone + fmt::Debug {
    type Id: Clone + PartialEq + fmt::Debug + fmt::Display;

    /// Collection name used in logs and errors.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;

    fn owner(&self) -> Option<CatalogId>;

    fn set_owner(&mut self, owner: Option<CatalogId>);

    /// Minimal admission check applied when loading a previous snapshot.
    fn is_well_formed(&self) -> bool;
}
