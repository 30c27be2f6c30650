// Reconciliation: merge one run's page observations into the catalog.
//
// Natural keys find existing entities so ids survive across runs. Scoped
// entities (coordinates, their items, cards) are pruned per chapter page when
// a page stops listing them. Brands, categories, characters, songs and parts
// are global and only ever added or updated.

pub mod ledger;
pub mod tuples;

use std::collections::HashSet;
use std::sync::Arc;

use lookbook_common::{
    Brand, Card, Category, Chapter, Character, Coordinate, CoordinateItem, Part, Song,
};
use tracing::{debug, info, warn};

use crate::catalog::{Collection, Result, SharedCatalog};
use crate::images::{ImageLoader, ImageSlot, ImageTarget};

pub use ledger::{EntityState, Ledger, RunLedger, Scope, ScopeKind, ScopeReport};
pub use tuples::{
    estimated_item_id, non_empty, parse_period, seal_id_from_image_url, BrandTuple, CardPage,
    CardTuple, OutfitPage, OutfitTuple, PartPage, PartTuple, PieceTuple,
};

/// Result of one outfit observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateOutcome {
    pub id: i32,
    pub created: bool,
    /// Items stored under this coordinate.
    pub item_ids: Vec<i32>,
    /// Items of other coordinates this outfit links to by seal id.
    pub linked_item_ids: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardOutcome {
    pub id: i32,
    pub created: bool,
}

type ImageRequest = (ImageTarget, Option<String>);

pub struct Reconciler {
    catalog: SharedCatalog,
    images: Arc<ImageLoader>,
    run: RunLedger,
    created: usize,
}

impl Reconciler {
    pub fn new(catalog: SharedCatalog, images: Arc<ImageLoader>) -> Self {
        Self {
            catalog,
            images,
            run: RunLedger::default(),
            created: 0,
        }
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.run
    }

    // -----------------------------------------------------------------------
    // Whole pages
    // -----------------------------------------------------------------------

    /// Reconcile one outfit chapter page as a single scope.
    pub async fn reconcile_outfit_page(&mut self, page: &OutfitPage) -> Result<ScopeReport> {
        let chapter_id = non_empty(Some(&page.chapter_id)).map(String::from);
        if let Some(id) = &chapter_id {
            self.upsert_outfit_chapter(id, &page.chapter_name).await?;
        }

        let scope = self.begin_scope(ScopeKind::Outfits, chapter_id.as_deref()).await;
        for outfit in &page.outfits {
            self.upsert_coordinate(chapter_id.as_deref(), outfit).await?;
        }
        Ok(self.finish_scope(scope).await)
    }

    /// Reconcile one card chapter page as a single scope.
    pub async fn reconcile_card_page(&mut self, page: &CardPage) -> Result<ScopeReport> {
        let chapter_id = non_empty(Some(&page.chapter_id)).map(String::from);
        if let Some(id) = &chapter_id {
            self.upsert_card_chapter(id, &page.chapter_name).await?;
        }

        let scope = self.begin_scope(ScopeKind::Cards, chapter_id.as_deref()).await;
        for card in &page.cards {
            self.upsert_card(chapter_id.as_deref(), card).await?;
        }
        Ok(self.finish_scope(scope).await)
    }

    /// Merge a part list. Parts are global, so nothing is pruned. Returns how
    /// many parts were merged.
    pub async fn reconcile_part_page(&mut self, page: &PartPage) -> Result<usize> {
        let mut merged = 0;
        for part in &page.parts {
            if self.upsert_part(part).await?.is_some() {
                merged += 1;
            }
        }
        Ok(merged)
    }

    // -----------------------------------------------------------------------
    // Scopes
    // -----------------------------------------------------------------------

    /// Capture the current members of a chapter before its page is replayed.
    pub async fn begin_scope(&self, kind: ScopeKind, chapter_id: Option<&str>) -> Scope {
        let catalog = self.catalog.lock().await;
        let mut scope = Scope {
            kind,
            chapter_id: chapter_id.map(String::from),
            created_before: self.created,
            coordinates: Vec::new(),
            items: Vec::new(),
            cards: Vec::new(),
        };

        match kind {
            ScopeKind::Outfits => {
                scope.coordinates = catalog
                    .coordinates
                    .iter()
                    .filter(|c| c.chapter_id.as_deref() == chapter_id)
                    .map(|c| c.id)
                    .collect();
                let members: HashSet<i32> = scope.coordinates.iter().copied().collect();
                scope.items = catalog
                    .coordinate_items
                    .iter()
                    .filter(|i| members.contains(&i.coordinate_id))
                    .map(|i| i.id)
                    .collect();
            }
            ScopeKind::Cards => {
                scope.cards = catalog
                    .cards
                    .iter()
                    .filter(|c| c.chapter_id.as_deref() == chapter_id)
                    .map(|c| c.id)
                    .collect();
            }
        }

        debug!(
            chapter = chapter_id.unwrap_or(""),
            kind = ?kind,
            coordinates = scope.coordinates.len(),
            items = scope.items.len(),
            cards = scope.cards.len(),
            "Scope started"
        );
        scope
    }

    /// Remove every pre-existing member of the scope that was not matched.
    pub async fn finish_scope(&mut self, scope: Scope) -> ScopeReport {
        let mut catalog = self.catalog.lock().await;
        let chapter = scope.chapter_id.as_deref();

        let pruned_coordinates = prune(
            &mut catalog.coordinates,
            &scope.coordinates,
            &mut self.run.coordinates,
        );
        let pruned_items = prune(
            &mut catalog.coordinate_items,
            &scope.items,
            &mut self.run.items,
        );
        let pruned_cards = prune(&mut catalog.cards, &scope.cards, &mut self.run.cards);

        let matched = match scope.kind {
            ScopeKind::Outfits => catalog
                .coordinates
                .iter()
                .filter(|c| c.chapter_id.as_deref() == chapter && self.run.coordinates.is_matched(c.id))
                .count(),
            ScopeKind::Cards => catalog
                .cards
                .iter()
                .filter(|c| c.chapter_id.as_deref() == chapter && self.run.cards.is_matched(c.id))
                .count(),
        };

        let report = ScopeReport {
            chapter_id: scope.chapter_id.clone().unwrap_or_default(),
            matched,
            created: self.created - scope.created_before,
            pruned_coordinates,
            pruned_items,
            pruned_cards,
        };
        info!(
            chapter = %report.chapter_id,
            kind = ?scope.kind,
            matched = report.matched,
            created = report.created,
            pruned = report.pruned(),
            "Scope reconciled"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Chapters and global entities
    // -----------------------------------------------------------------------

    pub async fn upsert_outfit_chapter(&mut self, id: &str, name: &str) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        upsert_chapter(&mut catalog.outfit_chapters, id, name)
    }

    pub async fn upsert_card_chapter(&mut self, id: &str, name: &str) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        upsert_chapter(&mut catalog.card_chapters, id, name)
    }

    /// Find a brand by name, creating it if needed, and refresh its logo.
    pub async fn upsert_brand(&mut self, name: &str, image_url: Option<&str>) -> Result<i32> {
        let name = name.trim();
        let id = {
            let mut catalog = self.catalog.lock().await;
            let (brand, created) = catalog.brands.find_or_insert_with(
                |b| b.name == name,
                |id| {
                    let mut b = Brand::with_id(id);
                    b.name = name.to_string();
                    b
                },
            )?;
            if created {
                info!(id = brand.id, name, "New brand");
            }
            brand.image_url = image_url.map(String::from);
            brand.id
        };
        self.request_images(vec![(
            ImageTarget::new(ImageSlot::Brand, id),
            image_url.map(String::from),
        )]);
        Ok(id)
    }

    pub async fn upsert_category(&mut self, name: &str) -> Result<i32> {
        let mut catalog = self.catalog.lock().await;
        named(&mut catalog.categories, name, |id, name| {
            let mut c = Category::with_id(id);
            c.name = name.to_string();
            c
        })
    }

    pub async fn upsert_character(&mut self, name: &str) -> Result<i32> {
        let mut catalog = self.catalog.lock().await;
        named(&mut catalog.characters, name, |id, name| {
            let mut c = Character::with_id(id);
            c.name = name.to_string();
            c
        })
    }

    pub async fn upsert_song(&mut self, name: &str) -> Result<i32> {
        let mut catalog = self.catalog.lock().await;
        named(&mut catalog.songs, name, |id, name| {
            let mut s = Song::with_id(id);
            s.name = name.to_string();
            s
        })
    }

    /// Parts are keyed by name; their category lives in the part category list.
    pub async fn upsert_part(&mut self, part: &PartTuple) -> Result<Option<i32>> {
        let Some(name) = non_empty(Some(&part.name)) else {
            warn!("Part without a name, skipping");
            return Ok(None);
        };

        let id = {
            let mut catalog = self.catalog.lock().await;
            let category_id = match non_empty(Some(&part.category)) {
                Some(category) => named(&mut catalog.part_categories, category, |id, name| {
                    let mut c = Category::with_id(id);
                    c.name = name.to_string();
                    c
                })?,
                None => 0,
            };
            let (entity, created) = catalog.parts.find_or_insert_with(
                |p| p.name == name,
                |id| {
                    let mut p = Part::with_id(id);
                    p.name = name.to_string();
                    p
                },
            )?;
            if created {
                info!(id = entity.id, name, "New part");
            }
            entity.category_id = category_id;
            entity.description = non_empty(part.description.as_deref()).map(String::from);
            entity.image_url = part.image_url.clone();
            entity.id
        };

        self.request_images(vec![(
            ImageTarget::new(ImageSlot::Part, id),
            part.image_url.clone(),
        )]);
        Ok(Some(id))
    }

    // -----------------------------------------------------------------------
    // Scoped entities
    // -----------------------------------------------------------------------

    /// Merge one outfit and its pieces. Returns `None` for an untitled outfit.
    pub async fn upsert_coordinate(
        &mut self,
        chapter_id: Option<&str>,
        outfit: &OutfitTuple,
    ) -> Result<Option<CoordinateOutcome>> {
        let Some(title) = non_empty(Some(&outfit.title)) else {
            warn!(chapter = chapter_id.unwrap_or(""), "Outfit without a title, skipping");
            return Ok(None);
        };

        let brand_id = match outfit.brand.as_ref().filter(|b| !b.name.trim().is_empty()) {
            Some(brand) => Some(self.upsert_brand(&brand.name, brand.image_url.as_deref()).await?),
            None => None,
        };
        let mut category_ids = Vec::with_capacity(outfit.pieces.len());
        for piece in &outfit.pieces {
            category_ids.push(match non_empty(Some(&piece.category)) {
                Some(name) => Some(self.upsert_category(name).await?),
                None => None,
            });
        }
        let kind = non_empty(outfit.kind.as_deref()).map(String::from);
        let period = outfit.period.as_deref().map(parse_period);

        let mut requests: Vec<ImageRequest> = Vec::new();
        let mut catalog = self.catalog.lock().await;

        let (coordinate, created) = catalog.coordinates.find_or_insert_with(
            |c| c.chapter_id.as_deref() == chapter_id && c.kind == kind && c.name == title,
            |id| {
                let mut c = Coordinate::with_id(id);
                c.chapter_id = chapter_id.map(String::from);
                c.kind = kind.clone();
                c.name = title.to_string();
                c
            },
        )?;
        let id = coordinate.id;
        if created {
            self.created += 1;
            info!(id, name = title, chapter = chapter_id.unwrap_or(""), "New coordinate");
        } else {
            debug!(id, name = title, "Coordinate matched");
        }

        if self.run.coordinates.mark_matched(id) {
            coordinate.linked_item_ids.clear();
        }
        coordinate.brand_id = brand_id;
        if outfit.star.is_some() {
            coordinate.star = outfit.star;
        }
        if let Some((start, end)) = period {
            coordinate.start = start;
            coordinate.end = end;
        }
        coordinate.image_url = outfit.image_url.clone();
        coordinate.thumbnail_url = outfit.thumbnail_url.clone();
        requests.push((
            ImageTarget::new(ImageSlot::Coordinate, id),
            outfit.image_url.clone(),
        ));
        requests.push((
            ImageTarget::new(ImageSlot::CoordinateThumbnail, id),
            outfit.thumbnail_url.clone(),
        ));

        let mut outcome = CoordinateOutcome {
            id,
            created,
            ..Default::default()
        };

        for (piece, category_id) in outfit.pieces.iter().zip(category_ids) {
            let Some(category_id) = category_id else {
                warn!(coordinate = id, "Piece without a category, skipping");
                continue;
            };
            let seal = non_empty(piece.seal_id.as_deref()).map(String::from);

            // A seal already matched this run is stored once. Other coordinates
            // link it; a repeat under another category of its own is dropped.
            if let Some(linked) = seal.as_ref().and_then(|s| self.run.seals.get(s)).copied() {
                let owner = catalog
                    .coordinate_items
                    .get(&linked)
                    .map(|item| (item.coordinate_id, item.category_id));
                if owner.is_some_and(|(owner, category)| owner == id && category != category_id) {
                    debug!(coordinate = id, item = linked, "Seal repeated in coordinate, skipping");
                    continue;
                }
                if owner.is_some_and(|(owner, _)| owner != id) {
                    if let Some(coordinate) = catalog.coordinates.get_mut(&id) {
                        if !coordinate.linked_item_ids.contains(&linked) {
                            coordinate.linked_item_ids.push(linked);
                        }
                    }
                    debug!(coordinate = id, item = linked, "Linked shared item");
                    outcome.linked_item_ids.push(linked);
                    continue;
                }
            }

            let estimate = piece
                .estimated_id()
                .filter(|eid| !catalog.coordinate_items.contains(eid));
            let (item, item_created) = catalog.coordinate_items.find_or_insert_with(
                |i| i.coordinate_id == id && i.category_id == category_id,
                |next| {
                    let mut i = CoordinateItem::with_id(estimate.unwrap_or(next));
                    i.coordinate_id = id;
                    i.category_id = category_id;
                    i
                },
            )?;
            if item_created {
                self.created += 1;
                info!(id = item.id, coordinate = id, "New coordinate item");
            }
            item.point = piece.point;
            if seal.is_some() {
                item.seal_id = seal.clone();
            }
            item.image_url = piece.image_url.clone();
            let item_id = item.id;

            self.run.items.mark_matched(item_id);
            if let Some(seal) = seal {
                self.run.seals.entry(seal).or_insert(item_id);
            }
            outcome.item_ids.push(item_id);
            requests.push((
                ImageTarget::new(ImageSlot::CoordinateItem, item_id),
                piece.image_url.clone(),
            ));
        }

        drop(catalog);
        self.request_images(requests);
        Ok(Some(outcome))
    }

    /// Merge one card. Returns `None` when the card names no coordinate or character.
    pub async fn upsert_card(
        &mut self,
        chapter_id: Option<&str>,
        card: &CardTuple,
    ) -> Result<Option<CardOutcome>> {
        let (Some(coordinate), Some(character)) = (
            non_empty(Some(&card.coordinate)),
            non_empty(Some(&card.character)),
        ) else {
            warn!(
                chapter = chapter_id.unwrap_or(""),
                image = card.image1_url.as_deref().unwrap_or(""),
                "Card without coordinate or character, skipping"
            );
            return Ok(None);
        };

        let character_id = self.upsert_character(character).await?;
        let song_id = match non_empty(card.song.as_deref()) {
            Some(song) => Some(self.upsert_song(song).await?),
            None => None,
        };
        let seal_id = card.resolved_seal_id();
        let image1 = non_empty(card.image1_url.as_deref()).map(String::from);
        let image2 = non_empty(card.image2_url.as_deref()).map(String::from);

        let mut catalog = self.catalog.lock().await;

        // Front image first; a card published without one is keyed by its
        // coordinate and character instead. A card whose front image was lost
        // is still found by its seal id among the cards not yet matched this run.
        let run = &self.run;
        let existing = catalog
            .cards
            .find(|c| {
                c.chapter_id.as_deref() == chapter_id
                    && c.image1_url == image1
                    && (image1.is_some()
                        || (c.coordinate == coordinate && c.character_id == character_id))
            })
            .or_else(|| {
                catalog.cards.find(|c| {
                    c.chapter_id.as_deref() == chapter_id
                        && !seal_id.is_empty()
                        && c.seal_id == seal_id
                        && !run.cards.is_matched(c.id)
                })
            })
            .map(|c| c.id);

        let (entity, created) = catalog.cards.find_or_insert_with(
            |c| Some(c.id) == existing,
            |id| {
                let mut c = Card::with_id(id);
                c.chapter_id = chapter_id.map(String::from);
                c
            },
        )?;
        let id = entity.id;
        if created {
            self.created += 1;
            info!(id, coordinate, character, "New card");
        }

        entity.seal_id = seal_id;
        entity.coordinate = coordinate.to_string();
        entity.character_id = character_id;
        entity.variant = non_empty(card.variant.as_deref()).map(String::from);
        entity.star = card.star;
        entity.point = card.point;
        entity.is_chance = card.is_chance;
        if let Some(order) = card.order {
            entity.order = order;
        }
        if let Some(song_id) = song_id {
            entity.song_id = song_id;
        }
        entity.image1_url = image1.clone();
        entity.image2_url = image2.clone();
        drop(catalog);

        self.run.cards.mark_matched(id);
        self.request_images(vec![
            (ImageTarget::new(ImageSlot::CardFront, id), image1),
            (ImageTarget::new(ImageSlot::CardBack, id), image2),
        ]);
        Ok(Some(CardOutcome { id, created }))
    }

    fn request_images(&self, requests: Vec<ImageRequest>) {
        for (target, url) in requests {
            // Handles are tracked by the loader and joined in bulk.
            let _ = self.images.request(target, url);
        }
    }
}

fn upsert_chapter(chapters: &mut Collection<Chapter>, id: &str, name: &str) -> Result<()> {
    let name = name.trim();
    match chapters.get_mut(&id.to_string()) {
        Some(chapter) => {
            if !name.is_empty() && chapter.name != name {
                info!(id, from = %chapter.name, to = name, "Chapter renamed");
                chapter.name = name.to_string();
            }
        }
        None => {
            let name = if name.is_empty() { id } else { name };
            chapters.add(Chapter::new(id, name))?;
            info!(id, name, "New chapter");
        }
    }
    Ok(())
}

/// Find-or-create for the name-keyed global collections.
fn named<T>(
    collection: &mut Collection<T>,
    name: &str,
    make: impl FnOnce(i32, &str) -> T,
) -> Result<i32>
where
    T: lookbook_common::Entity<Id = i32> + HasName,
{
    let name = name.trim();
    let (entity, created) =
        collection.find_or_insert_with(|e| e.name() == name, |id| make(id, name))?;
    if created {
        info!(kind = T::KIND, id = entity.id(), name, "New entry");
    }
    Ok(entity.id())
}

/// Entities whose natural key is their name.
trait HasName {
    fn name(&self) -> &str;
}

macro_rules! has_name {
    ($($ty:ty),*) => {
        $(impl HasName for $ty {
            fn name(&self) -> &str {
                &self.name
            }
        })*
    };
}

has_name!(Category, Character, Song);

fn prune<T>(collection: &mut Collection<T>, members: &[i32], ledger: &mut Ledger) -> usize
where
    T: lookbook_common::Entity<Id = i32>,
{
    let stale: HashSet<i32> = members
        .iter()
        .copied()
        .filter(|id| !ledger.is_matched(*id))
        .collect();
    if stale.is_empty() {
        return 0;
    }

    let removed = collection.remove_where(|e| stale.contains(&e.id()));
    for entity in &removed {
        ledger.mark_pruned(entity.id());
        info!(kind = T::KIND, id = entity.id(), "Pruned");
    }
    removed.len()
}
