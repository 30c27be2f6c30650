// In-memory catalog for one harvest run.
//
// Loaded from the previous snapshot, mutated by reconciliation and
// corrections, then written back out. Shared between the reconciler and the
// image loader behind a tokio mutex.

mod collection;
mod error;
pub mod snapshot;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use lookbook_common::{
    Brand, Card, CatalogId, Category, Chapter, Character, Coordinate, CoordinateItem, Part, Song,
};
use tokio::sync::Mutex;

pub use collection::Collection;
pub use error::{CatalogError, Result};

pub type SharedCatalog = Arc<Mutex<Catalog>>;

#[derive(Debug)]
pub struct Catalog {
    id: CatalogId,
    pub outfit_chapters: Collection<Chapter>,
    pub card_chapters: Collection<Chapter>,
    pub brands: Collection<Brand>,
    pub categories: Collection<Category>,
    pub part_categories: Collection<Category>,
    pub parts: Collection<Part>,
    pub coordinates: Collection<Coordinate>,
    pub coordinate_items: Collection<CoordinateItem>,
    pub characters: Collection<Character>,
    pub songs: Collection<Song>,
    pub cards: Collection<Card>,
}

impl Catalog {
    pub fn new() -> Self {
        let id = CatalogId::fresh();
        Self {
            id,
            outfit_chapters: Collection::new(id),
            card_chapters: Collection::new(id),
            brands: Collection::new(id),
            categories: Collection::new(id),
            part_categories: Collection::new(id),
            parts: Collection::new(id),
            coordinates: Collection::new(id),
            coordinate_items: Collection::new(id),
            characters: Collection::new(id),
            songs: Collection::new(id),
            cards: Collection::new(id),
        }
    }

    pub fn id(&self) -> CatalogId {
        self.id
    }

    pub fn into_shared(self) -> SharedCatalog {
        Arc::new(Mutex::new(self))
    }

    /// Recompute every derived field. Run after pruning and corrections.
    pub fn derive_fields(&mut self) {
        self.drop_dangling_links();
        self.derive_has_chance();
        self.derive_singers();
        self.derive_outfit_chapter_periods();
    }

    fn drop_dangling_links(&mut self) {
        let item_ids: HashSet<i32> = self.coordinate_items.iter().map(|i| i.id).collect();
        for coordinate in self.coordinates.iter_mut() {
            coordinate.linked_item_ids.retain(|id| item_ids.contains(id));
        }
    }

    fn derive_has_chance(&mut self) {
        let chance: HashSet<&str> = self
            .cards
            .iter()
            .filter(|c| c.is_chance)
            .map(|c| c.coordinate.as_str())
            .collect();
        for coordinate in self.coordinates.iter_mut() {
            coordinate.has_chance = chance.contains(coordinate.name.as_str());
        }
    }

    fn derive_singers(&mut self) {
        let mut singers: HashMap<i32, BTreeSet<i32>> = HashMap::new();
        for card in self.cards.iter().filter(|c| c.song_id > 0 && c.character_id > 0) {
            singers.entry(card.song_id).or_default().insert(card.character_id);
        }
        for song in self.songs.iter_mut() {
            song.singer_ids = singers
                .remove(&song.id)
                .map(|ids| ids.into_iter().collect())
                .unwrap_or_default();
        }
    }

    fn derive_outfit_chapter_periods(&mut self) {
        let coordinates = &self.coordinates;
        for chapter in self.outfit_chapters.iter_mut() {
            let in_chapter: Vec<&Coordinate> = coordinates
                .iter()
                .filter(|c| c.chapter_id.as_deref() == Some(chapter.id.as_str()))
                .collect();
            if let Some(start) = in_chapter.iter().filter_map(|c| c.start).min() {
                chapter.start = Some(start);
            }
            if let Some(end) = in_chapter.iter().filter_map(|c| c.end).max() {
                chapter.end = Some(end);
            }
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
