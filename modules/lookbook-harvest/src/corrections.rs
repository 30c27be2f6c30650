// Hand-maintained corrections applied on top of the reconciled catalog.
//
// `correction.json` holds one record list per collection. A record names its
// key kind and carries a sparse patch: fields that are present overwrite,
// absent ones are left alone. Records apply in file order, so later ones win.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use lookbook_common::{
    Brand, Card, Category, Character, Coordinate, CoordinateItem, Entity, Part, Song,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogError, Collection, Result, SharedCatalog};
use crate::images::{ImageLoader, ImageSlot, ImageTarget};

/// How a record finds its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Id,
    NaturalKey,
}

impl KeyKind {
    /// `""` and `"Id"` select by id; `"Name"`/`"NaturalKey"` by natural key.
    pub fn parse(collection: &'static str, key: &str) -> Result<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "" | "id" => Ok(Self::Id),
            "name" | "naturalkey" | "natural_key" => Ok(Self::NaturalKey),
            _ => Err(CatalogError::UnknownKeyKind {
                collection,
                key: key.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Correction<P> {
    #[serde(default)]
    pub key: String,
    pub data: Option<P>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrectionData {
    pub brands: Vec<Correction<BrandPatch>>,
    pub coordinates: Vec<Correction<CoordinatePatch>>,
    pub coordinate_items: Vec<Correction<ItemPatch>>,
    pub cards: Vec<Correction<CardPatch>>,
    pub characters: Vec<Correction<CharacterPatch>>,
    pub songs: Vec<Correction<SongPatch>>,
    pub parts: Vec<Correction<PartPatch>>,
}

impl CorrectionData {
    pub fn len(&self) -> usize {
        self.brands.len()
            + self.coordinates.len()
            + self.coordinate_items.len()
            + self.cards.len()
            + self.characters.len()
            + self.songs.len()
            + self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrandPatch {
    pub id: Option<i32>,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatePatch {
    pub id: Option<i32>,
    pub chapter_id: Option<String>,
    pub brand_id: Option<i32>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub star: Option<u8>,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub order: Option<f64>,
    pub linked_item_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ItemPatch {
    pub id: Option<i32>,
    pub coordinate_id: Option<i32>,
    pub seal_id: Option<String>,
    pub category_id: Option<i32>,
    /// Category by name; resolved (or created) before the patch applies.
    pub term: Option<String>,
    pub point: Option<i16>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CardPatch {
    pub id: Option<i32>,
    pub chapter_id: Option<String>,
    pub order: Option<f64>,
    pub seal_id: Option<String>,
    pub coordinate: Option<String>,
    pub character_id: Option<i32>,
    pub variant: Option<String>,
    pub song_id: Option<i32>,
    pub star: Option<u8>,
    pub point: Option<i16>,
    pub is_chance: Option<bool>,
    pub image1_url: Option<String>,
    pub image2_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CharacterPatch {
    pub id: Option<i32>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SongPatch {
    pub id: Option<i32>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartPatch {
    pub id: Option<i32>,
    pub category_id: Option<i32>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

type ImageRequest = (ImageTarget, Option<String>);

/// A sparse patch for one collection.
trait Patch: Clone {
    type Target: Entity<Id = i32>;
    const COLLECTION: &'static str;

    fn collection(catalog: &mut Catalog) -> &mut Collection<Self::Target>;

    fn id(&self) -> Option<i32>;

    /// True when `target` has the natural key this patch names. A patch
    /// missing its key fields matches nothing.
    fn natural_match(&self, target: &Self::Target) -> bool;

    fn create(id: i32) -> Self::Target;

    fn set_id(target: &mut Self::Target, id: i32);

    /// Fill key fields from existing catalog entries before the target lookup.
    fn lookup(&mut self, _catalog: &Catalog) {}

    /// Fill fields that may need new catalog entries. Runs only once the
    /// target exists.
    fn resolve(&mut self, _catalog: &mut Catalog) -> Result<()> {
        Ok(())
    }

    /// Overwrite present fields; returns the image fields that were set.
    fn apply(&self, target: &mut Self::Target) -> Vec<(ImageSlot, Option<String>)>;

    /// Point references at a reassigned id.
    fn reassign(_catalog: &mut Catalog, _from: i32, _to: i32) {}
}

fn set<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *field = v.clone();
    }
}

fn set_some<T: Clone>(field: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *field = value.clone();
    }
}

fn image(slot: ImageSlot, value: &Option<String>) -> Option<(ImageSlot, Option<String>)> {
    value.as_ref().map(|url| (slot, Some(url.clone())))
}

impl Patch for BrandPatch {
    type Target = Brand;
    const COLLECTION: &'static str = "brands";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Brand> {
        &mut catalog.brands
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Brand) -> bool {
        self.name.as_deref() == Some(target.name.as_str())
    }

    fn create(id: i32) -> Brand {
        Brand::with_id(id)
    }

    fn set_id(target: &mut Brand, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Brand) -> Vec<(ImageSlot, Option<String>)> {
        set(&mut target.name, &self.name);
        set_some(&mut target.image_url, &self.image_url);
        image(ImageSlot::Brand, &self.image_url).into_iter().collect()
    }

    fn reassign(catalog: &mut Catalog, from: i32, to: i32) {
        for c in catalog.coordinates.iter_mut() {
            if c.brand_id == Some(from) {
                c.brand_id = Some(to);
            }
        }
    }
}

impl Patch for CoordinatePatch {
    type Target = Coordinate;
    const COLLECTION: &'static str = "coordinates";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Coordinate> {
        &mut catalog.coordinates
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Coordinate) -> bool {
        self.name.as_deref() == Some(target.name.as_str())
            && self
                .chapter_id
                .as_ref()
                .map_or(true, |c| target.chapter_id.as_ref() == Some(c))
            && self.kind.as_ref().map_or(true, |k| target.kind.as_ref() == Some(k))
    }

    fn create(id: i32) -> Coordinate {
        Coordinate::with_id(id)
    }

    fn set_id(target: &mut Coordinate, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Coordinate) -> Vec<(ImageSlot, Option<String>)> {
        set_some(&mut target.chapter_id, &self.chapter_id);
        set_some(&mut target.brand_id, &self.brand_id);
        set_some(&mut target.kind, &self.kind);
        set_some(&mut target.group, &self.group);
        set_some(&mut target.star, &self.star);
        set(&mut target.name, &self.name);
        set_some(&mut target.image_url, &self.image_url);
        set_some(&mut target.thumbnail_url, &self.thumbnail_url);
        set_some(&mut target.start, &self.start);
        set_some(&mut target.end, &self.end);
        set(&mut target.order, &self.order);
        set(&mut target.linked_item_ids, &self.linked_item_ids);
        image(ImageSlot::Coordinate, &self.image_url)
            .into_iter()
            .chain(image(ImageSlot::CoordinateThumbnail, &self.thumbnail_url))
            .collect()
    }

    fn reassign(catalog: &mut Catalog, from: i32, to: i32) {
        for item in catalog.coordinate_items.iter_mut() {
            if item.coordinate_id == from {
                item.coordinate_id = to;
            }
        }
    }
}

impl Patch for ItemPatch {
    type Target = CoordinateItem;
    const COLLECTION: &'static str = "coordinate_items";

    fn collection(catalog: &mut Catalog) -> &mut Collection<CoordinateItem> {
        &mut catalog.coordinate_items
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &CoordinateItem) -> bool {
        self.coordinate_id == Some(target.coordinate_id)
            && self.category_id == Some(target.category_id)
    }

    fn create(id: i32) -> CoordinateItem {
        CoordinateItem::with_id(id)
    }

    fn set_id(target: &mut CoordinateItem, id: i32) {
        target.id = id;
    }

    fn lookup(&mut self, catalog: &Catalog) {
        if self.category_id.is_some() {
            return;
        }
        if let Some(term) = self.term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            self.category_id = catalog.categories.find(|c| c.name == term).map(|c| c.id);
        }
    }

    fn resolve(&mut self, catalog: &mut Catalog) -> Result<()> {
        if self.category_id.is_some() {
            return Ok(());
        }
        if let Some(term) = self.term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let (category, created) = catalog.categories.find_or_insert_with(
                |c| c.name == term,
                |id| {
                    let mut c = Category::with_id(id);
                    c.name = term.to_string();
                    c
                },
            )?;
            if created {
                info!(id = category.id, name = term, "New category from correction");
            }
            self.category_id = Some(category.id);
        }
        Ok(())
    }

    fn apply(&self, target: &mut CoordinateItem) -> Vec<(ImageSlot, Option<String>)> {
        set(&mut target.coordinate_id, &self.coordinate_id);
        set_some(&mut target.seal_id, &self.seal_id);
        set(&mut target.category_id, &self.category_id);
        set(&mut target.point, &self.point);
        set_some(&mut target.image_url, &self.image_url);
        image(ImageSlot::CoordinateItem, &self.image_url)
            .into_iter()
            .collect()
    }

    fn reassign(catalog: &mut Catalog, from: i32, to: i32) {
        for c in catalog.coordinates.iter_mut() {
            for id in c.linked_item_ids.iter_mut().filter(|id| **id == from) {
                *id = to;
            }
        }
    }
}

impl Patch for CardPatch {
    type Target = Card;
    const COLLECTION: &'static str = "cards";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Card> {
        &mut catalog.cards
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Card) -> bool {
        self.image1_url.is_some()
            && self.image1_url == target.image1_url
            && self
                .chapter_id
                .as_ref()
                .map_or(true, |c| target.chapter_id.as_ref() == Some(c))
    }

    fn create(id: i32) -> Card {
        Card::with_id(id)
    }

    fn set_id(target: &mut Card, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Card) -> Vec<(ImageSlot, Option<String>)> {
        set_some(&mut target.chapter_id, &self.chapter_id);
        set(&mut target.order, &self.order);
        set(&mut target.seal_id, &self.seal_id);
        set(&mut target.coordinate, &self.coordinate);
        set(&mut target.character_id, &self.character_id);
        set_some(&mut target.variant, &self.variant);
        set(&mut target.song_id, &self.song_id);
        set(&mut target.star, &self.star);
        set(&mut target.point, &self.point);
        set(&mut target.is_chance, &self.is_chance);
        set_some(&mut target.image1_url, &self.image1_url);
        set_some(&mut target.image2_url, &self.image2_url);
        image(ImageSlot::CardFront, &self.image1_url)
            .into_iter()
            .chain(image(ImageSlot::CardBack, &self.image2_url))
            .collect()
    }
}

impl Patch for CharacterPatch {
    type Target = Character;
    const COLLECTION: &'static str = "characters";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Character> {
        &mut catalog.characters
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Character) -> bool {
        self.name.as_deref() == Some(target.name.as_str())
    }

    fn create(id: i32) -> Character {
        Character::with_id(id)
    }

    fn set_id(target: &mut Character, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Character) -> Vec<(ImageSlot, Option<String>)> {
        set(&mut target.name, &self.name);
        Vec::new()
    }

    fn reassign(catalog: &mut Catalog, from: i32, to: i32) {
        for card in catalog.cards.iter_mut().filter(|c| c.character_id == from) {
            card.character_id = to;
        }
    }
}

impl Patch for SongPatch {
    type Target = Song;
    const COLLECTION: &'static str = "songs";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Song> {
        &mut catalog.songs
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Song) -> bool {
        self.name.as_deref() == Some(target.name.as_str())
    }

    fn create(id: i32) -> Song {
        Song::with_id(id)
    }

    fn set_id(target: &mut Song, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Song) -> Vec<(ImageSlot, Option<String>)> {
        set(&mut target.name, &self.name);
        Vec::new()
    }

    fn reassign(catalog: &mut Catalog, from: i32, to: i32) {
        for card in catalog.cards.iter_mut().filter(|c| c.song_id == from) {
            card.song_id = to;
        }
    }
}

impl Patch for PartPatch {
    type Target = Part;
    const COLLECTION: &'static str = "parts";

    fn collection(catalog: &mut Catalog) -> &mut Collection<Part> {
        &mut catalog.parts
    }

    fn id(&self) -> Option<i32> {
        self.id
    }

    fn natural_match(&self, target: &Part) -> bool {
        self.name.as_deref() == Some(target.name.as_str())
    }

    fn create(id: i32) -> Part {
        Part::with_id(id)
    }

    fn set_id(target: &mut Part, id: i32) {
        target.id = id;
    }

    fn apply(&self, target: &mut Part) -> Vec<(ImageSlot, Option<String>)> {
        set(&mut target.category_id, &self.category_id);
        set(&mut target.name, &self.name);
        set_some(&mut target.description, &self.description);
        set_some(&mut target.image_url, &self.image_url);
        image(ImageSlot::Part, &self.image_url).into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Counts for one collection's records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    pub patched: usize,
    pub created: usize,
    pub skipped: usize,
}

impl std::ops::AddAssign for PatchStats {
    fn add_assign(&mut self, other: Self) {
        self.patched += other.patched;
        self.created += other.created;
        self.skipped += other.skipped;
    }
}

fn apply_records<P: Patch>(
    catalog: &mut Catalog,
    records: &[Correction<P>],
    create_missing: bool,
    requests: &mut Vec<ImageRequest>,
) -> Result<PatchStats> {
    let mut stats = PatchStats::default();

    for record in records {
        let kind = KeyKind::parse(P::COLLECTION, &record.key)?;
        let Some(patch) = &record.data else {
            continue;
        };
        let mut patch = patch.clone();
        patch.lookup(catalog);

        let collection = P::collection(catalog);
        let found = match kind {
            KeyKind::Id => patch
                .id()
                .and_then(|id| collection.position(|e| e.id() == id)),
            KeyKind::NaturalKey => collection.position(|e| patch.natural_match(e)),
        };

        let index = match (found, patch.id().filter(|id| *id > 0)) {
            (Some(index), _) => index,
            (None, Some(id)) if create_missing && !collection.contains(&id) => {
                collection.add(P::create(id))?;
                info!(collection = P::COLLECTION, id, "Created from correction");
                stats.created += 1;
                collection.len() - 1
            }
            _ => {
                warn!(
                    collection = P::COLLECTION,
                    key = %record.key,
                    id = ?patch.id(),
                    "Correction target not found, skipping"
                );
                stats.skipped += 1;
                continue;
            }
        };

        let Some(current_id) = collection.iter().nth(index).map(|e| e.id()) else {
            continue;
        };
        let reassign_to = match (kind, patch.id()) {
            (KeyKind::NaturalKey, Some(id))
                if id > 0 && id != current_id && !collection.contains(&id) =>
            {
                Some(id)
            }
            _ => None,
        };

        patch.resolve(catalog)?;
        if let Some(target) = P::collection(catalog).at_mut(index) {
            if let Some(id) = reassign_to {
                P::set_id(target, id);
            }
            let target_id = target.id();
            for (slot, url) in patch.apply(target) {
                requests.push((ImageTarget::new(slot, target_id), url));
            }
        }
        stats.patched += 1;

        if let Some(id) = reassign_to {
            P::reassign(catalog, current_id, id);
            info!(collection = P::COLLECTION, from = current_id, to = id, "Id reassigned by correction");
        }
    }

    Ok(stats)
}

/// Outcome of one correction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    pub brands: PatchStats,
    pub coordinates: PatchStats,
    pub coordinate_items: PatchStats,
    pub cards: PatchStats,
    pub characters: PatchStats,
    pub songs: PatchStats,
    pub parts: PatchStats,
}

impl CorrectionReport {
    pub fn total(&self) -> PatchStats {
        let mut total = PatchStats::default();
        for stats in [
            self.brands,
            self.coordinates,
            self.coordinate_items,
            self.cards,
            self.characters,
            self.songs,
            self.parts,
        ] {
            total += stats;
        }
        total
    }
}

pub struct CorrectionOverlay {
    catalog: SharedCatalog,
    images: Arc<ImageLoader>,
}

impl CorrectionOverlay {
    pub fn new(catalog: SharedCatalog, images: Arc<ImageLoader>) -> Self {
        Self { catalog, images }
    }

    /// Apply a correction document. An unknown key kind aborts with an error.
    pub async fn apply(&self, data: &CorrectionData) -> Result<CorrectionReport> {
        let mut requests = Vec::new();
        let report = {
            let mut catalog = self.catalog.lock().await;
            let c = &mut *catalog;
            CorrectionReport {
                brands: apply_records(c, &data.brands, true, &mut requests)?,
                coordinates: apply_records(c, &data.coordinates, true, &mut requests)?,
                coordinate_items: apply_records(c, &data.coordinate_items, true, &mut requests)?,
                cards: apply_records(c, &data.cards, true, &mut requests)?,
                characters: apply_records(c, &data.characters, true, &mut requests)?,
                songs: apply_records(c, &data.songs, true, &mut requests)?,
                parts: apply_records(c, &data.parts, true, &mut requests)?,
            }
        };
        self.request_images(requests);

        let total = report.total();
        info!(
            patched = total.patched,
            created = total.created,
            skipped = total.skipped,
            "Corrections applied"
        );
        Ok(report)
    }

    /// Apply the legacy known-typo document. It only patches existing items.
    pub async fn apply_known_typos(&self, doc: &KnownTypos) -> Result<PatchStats> {
        let records: Vec<Correction<ItemPatch>> = doc
            .coordinate_items
            .iter()
            .map(|r| Correction {
                key: r.key.clone(),
                data: r.data.as_ref().map(ItemRename::to_patch),
            })
            .collect();

        let mut requests = Vec::new();
        let stats = {
            let mut catalog = self.catalog.lock().await;
            apply_records(&mut catalog, &records, false, &mut requests)?
        };
        self.request_images(requests);
        info!(patched = stats.patched, "Known typos corrected");
        Ok(stats)
    }

    fn request_images(&self, requests: Vec<ImageRequest>) {
        for (target, url) in requests {
            let _ = self.images.request(target, url);
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy known-typo document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KnownTypos {
    pub coordinate_items: Vec<Correction<ItemRename>>,
}

/// The renaming fields the legacy document may carry. Other fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ItemRename {
    pub id: Option<i32>,
    pub seal_id: Option<String>,
    pub term: Option<String>,
    pub point: Option<i16>,
}

impl ItemRename {
    fn to_patch(&self) -> ItemPatch {
        let trimmed = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        ItemPatch {
            id: self.id,
            seal_id: trimmed(&self.seal_id),
            term: trimmed(&self.term),
            point: self.point.filter(|p| *p > 0),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Read a correction-style JSON document. A missing file is not an error.
pub async fn load_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let doc = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(doc))
}
