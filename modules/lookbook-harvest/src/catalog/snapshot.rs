// `data.json` load and save.
//
// Loading never fails: a missing or malformed document yields an empty
// catalog, and each element is admitted on its own so one bad row does not
// cost the rest. Saving sorts every collection so unchanged input produces
// byte-identical output.

use std::collections::HashMap;
use std::path::Path;

use lookbook_common::{
    Brand, Card, Category, Chapter, Character, Coordinate, CoordinateItem, Entity, Part, Song,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{Catalog, Collection, Result};

pub const SNAPSHOT_FILE: &str = "data.json";

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawSnapshot {
    outfit_chapters: Vec<Value>,
    card_chapters: Vec<Value>,
    brands: Vec<Value>,
    categories: Vec<Value>,
    part_categories: Vec<Value>,
    parts: Vec<Value>,
    coordinates: Vec<Value>,
    coordinate_items: Vec<Value>,
    characters: Vec<Value>,
    songs: Vec<Value>,
    cards: Vec<Value>,
}

#[derive(Serialize)]
struct SnapshotDocument<'a> {
    outfit_chapters: Vec<&'a Chapter>,
    card_chapters: Vec<&'a Chapter>,
    brands: Vec<&'a Brand>,
    categories: Vec<&'a Category>,
    part_categories: Vec<&'a Category>,
    parts: Vec<&'a Part>,
    coordinates: Vec<&'a Coordinate>,
    coordinate_items: Vec<&'a CoordinateItem>,
    characters: Vec<&'a Character>,
    songs: Vec<&'a Song>,
    cards: Vec<&'a Card>,
}

/// Read the previous snapshot into a fresh catalog.
pub async fn load(path: &Path) -> Catalog {
    let mut catalog = Catalog::new();

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No previous snapshot, starting empty");
            return catalog;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable snapshot, starting empty");
            return catalog;
        }
    };

    let raw: RawSnapshot = match serde_json::from_slice(&bytes) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed snapshot, starting empty");
            return catalog;
        }
    };

    let rejected = admit(&mut catalog.outfit_chapters, raw.outfit_chapters)
        + admit(&mut catalog.card_chapters, raw.card_chapters)
        + admit(&mut catalog.brands, raw.brands)
        + admit(&mut catalog.categories, raw.categories)
        + admit(&mut catalog.part_categories, raw.part_categories)
        + admit(&mut catalog.parts, raw.parts)
        + admit(&mut catalog.coordinates, raw.coordinates)
        + admit(&mut catalog.coordinate_items, raw.coordinate_items)
        + admit(&mut catalog.characters, raw.characters)
        + admit(&mut catalog.songs, raw.songs)
        + admit(&mut catalog.cards, raw.cards);

    if rejected > 0 {
        warn!(rejected, "Dropped malformed snapshot rows");
    }
    info!(
        coordinates = catalog.coordinates.len(),
        items = catalog.coordinate_items.len(),
        cards = catalog.cards.len(),
        "Snapshot loaded"
    );
    catalog
}

fn admit<T: Entity + DeserializeOwned>(target: &mut Collection<T>, rows: Vec<Value>) -> usize {
    let mut rejected = 0;
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(entity) if entity.is_well_formed() => {
                if let Err(e) = target.add(entity) {
                    warn!(error = %e, "Skipping snapshot row");
                    rejected += 1;
                }
            }
            _ => rejected += 1,
        }
    }
    rejected
}

/// Serialize the catalog in snapshot order.
pub fn to_json(catalog: &Catalog) -> Result<Vec<u8>> {
    let outfit_chapters = sorted_chapters(&catalog.outfit_chapters);
    let card_chapters = sorted_chapters(&catalog.card_chapters);

    let coordinates = sorted_by_chapter(&catalog.coordinates, &outfit_chapters, |c| {
        (c.chapter_id.as_deref(), c.order, c.id)
    });
    let cards = sorted_by_chapter(&catalog.cards, &card_chapters, |c| {
        (c.chapter_id.as_deref(), c.order, c.id)
    });

    let mut songs: Vec<&Song> = catalog.songs.iter().collect();
    songs.sort_by_key(|s| (s.singer_ids.first().copied().unwrap_or(i32::MAX), s.id));

    let document = SnapshotDocument {
        outfit_chapters,
        card_chapters,
        brands: sorted_by_id(&catalog.brands),
        categories: sorted_by_id(&catalog.categories),
        part_categories: sorted_by_id(&catalog.part_categories),
        parts: sorted_by_id(&catalog.parts),
        coordinates,
        coordinate_items: sorted_by_id(&catalog.coordinate_items),
        characters: sorted_by_id(&catalog.characters),
        songs,
        cards,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

/// Write the snapshot next to its final location, then swap it in.
pub async fn save(catalog: &Catalog, path: &Path) -> Result<()> {
    let json = to_json(catalog)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".new");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;

    info!(path = %path.display(), "Snapshot written");
    Ok(())
}

fn sorted_by_id<T: Entity<Id = i32>>(collection: &Collection<T>) -> Vec<&T> {
    let mut rows: Vec<&T> = collection.iter().collect();
    rows.sort_by_key(|e| e.id());
    rows
}

fn sorted_chapters(collection: &Collection<Chapter>) -> Vec<&Chapter> {
    let mut rows: Vec<&Chapter> = collection.iter().collect();
    rows.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| numeric(&a.id).cmp(&numeric(&b.id)))
            .then_with(|| a.id.cmp(&b.id))
    });
    rows
}

fn numeric(id: &str) -> i64 {
    id.parse().unwrap_or(i64::MAX)
}

/// Order by the position of the owning chapter, then display order, then id.
/// Rows without a known chapter go last.
fn sorted_by_chapter<'a, T, F>(
    collection: &'a Collection<T>,
    chapters: &[&Chapter],
    key: F,
) -> Vec<&'a T>
where
    T: Entity,
    F: Fn(&T) -> (Option<&str>, f64, i32),
{
    let position: HashMap<&str, usize> = chapters
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();
    let rank = |chapter: Option<&str>| {
        chapter
            .and_then(|id| position.get(id).copied())
            .unwrap_or(usize::MAX)
    };

    let mut rows: Vec<&T> = collection.iter().collect();
    rows.sort_by(|a, b| {
        let (ca, oa, ia) = key(a);
        let (cb, ob, ib) = key(b);
        rank(ca)
            .cmp(&rank(cb))
            .then_with(|| oa.total_cmp(&ob))
            .then_with(|| ia.cmp(&ib))
    });
    rows
}
