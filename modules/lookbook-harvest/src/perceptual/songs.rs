// Assign songs to cards by back-art.
//
// A card that arrived with a song label and whose song has no reference yet
// contributes its crop as that song's reference (`songs/<id>-<slug>.png`).
// Unlabelled cards are then matched against every reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use lookbook_common::MatcherConfig;
use tracing::{debug, info, warn};

use super::{Fingerprint, PerceptualMatcher};
use crate::catalog::SharedCatalog;
use crate::images::{ImageSlot, ImageTarget};

pub const SONG_ART_DIR: &str = "songs";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SongMatchReport {
    pub references: usize,
    pub bootstrapped: usize,
    pub matched: usize,
    pub unmatched: usize,
}

/// File-name-safe form of a song name.
pub fn song_slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "song".to_string()
    } else {
        slug
    }
}

/// Reference file name for a song. The id keeps names with the same slug apart.
pub fn song_reference_name(id: i32, name: &str) -> String {
    format!("{id:06}-{}.png", song_slug(name))
}

struct CardArt {
    id: i32,
    song_id: i32,
    path: PathBuf,
}

struct SongOutcome {
    assignments: Vec<(i32, i32)>,
    report: SongMatchReport,
}

/// Run the matching pass over the catalog's cards.
pub async fn resolve_songs(
    catalog: &SharedCatalog,
    output_dir: &Path,
    config: &MatcherConfig,
) -> anyhow::Result<SongMatchReport> {
    let (songs, cards) = {
        let catalog = catalog.lock().await;
        let songs: HashMap<i32, String> = catalog
            .songs
            .iter()
            .map(|s| (s.id, s.name.clone()))
            .collect();
        let cards: Vec<CardArt> = catalog
            .cards
            .iter()
            .filter_map(|c| {
                let url = c.image2_url.as_deref()?;
                Some(CardArt {
                    id: c.id,
                    song_id: c.song_id,
                    path: ImageTarget::new(ImageSlot::CardBack, c.id).file_path(output_dir, url),
                })
            })
            .collect();
        (songs, cards)
    };

    let output_dir = output_dir.to_path_buf();
    let matcher = PerceptualMatcher::new(config.clone());
    let outcome =
        tokio::task::spawn_blocking(move || match_songs(matcher, &output_dir, &songs, &cards))
            .await?;

    let mut catalog = catalog.lock().await;
    for (card_id, song_id) in &outcome.assignments {
        if let Some(card) = catalog.cards.get_mut(card_id) {
            if card.song_id == 0 {
                card.song_id = *song_id;
            }
        }
    }

    let r = outcome.report;
    info!(
        references = r.references,
        bootstrapped = r.bootstrapped,
        matched = r.matched,
        unmatched = r.unmatched,
        "Song matching complete"
    );
    Ok(r)
}

fn match_songs(
    mut matcher: PerceptualMatcher,
    output_dir: &Path,
    songs: &HashMap<i32, String>,
    cards: &[CardArt],
) -> SongOutcome {
    let dir = output_dir.join(SONG_ART_DIR);
    let reference_path = |id: i32, name: &str| dir.join(song_reference_name(id, name));
    let mut report = SongMatchReport::default();

    for (id, name) in songs {
        let path = reference_path(*id, name);
        if !path.is_file() {
            continue;
        }
        match image::open(&path) {
            Ok(img) => matcher.add_reference(*id, Fingerprint::of_image(&img)),
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable song reference"),
        }
    }

    for card in cards.iter().filter(|c| c.song_id > 0) {
        if matcher.has_reference(card.song_id) {
            continue;
        }
        let Some(name) = songs.get(&card.song_id) else {
            continue;
        };
        let Some(art) = open_card(&card.path) else {
            continue;
        };
        let crop = matcher.crop(&art);
        let path = reference_path(card.song_id, name);
        if let Err(e) = save_reference(&crop, &path) {
            warn!(path = %path.display(), error = %e, "Failed to write song reference");
        }
        matcher.add_reference(card.song_id, Fingerprint::of_image(&crop));
        report.bootstrapped += 1;
        info!(song = %name, card = card.id, "Song reference registered");
    }
    report.references = matcher.len();

    let mut assignments = Vec::new();
    for card in cards.iter().filter(|c| c.song_id == 0) {
        let Some(art) = open_card(&card.path) else {
            report.unmatched += 1;
            continue;
        };
        match matcher.best_match(&matcher.candidate(&art)) {
            Some(m) => {
                debug!(
                    card = card.id,
                    song = m.id,
                    distance = m.distance,
                    correlation = m.correlation,
                    "Song matched"
                );
                assignments.push((card.id, m.id));
                report.matched += 1;
            }
            None => report.unmatched += 1,
        }
    }

    SongOutcome {
        assignments,
        report,
    }
}

fn open_card(path: &Path) -> Option<DynamicImage> {
    match image::open(path) {
        Ok(img) => Some(img),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Card back not readable");
            None
        }
    }
}

fn save_reference(crop: &DynamicImage, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    crop.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_replaces_path_characters() {
        assert_eq!(song_slug("Hello / World?"), "Hello___World_");
        assert_eq!(song_slug("アイドル"), "アイドル");
        assert_eq!(song_slug("  "), "song");
    }

    #[test]
    fn colliding_slugs_get_distinct_reference_files() {
        assert_eq!(song_slug("A/B"), song_slug("A?B"));
        assert_eq!(song_reference_name(1, "A/B"), "000001-A_B.png");
        assert_ne!(song_reference_name(1, "A/B"), song_reference_name(2, "A?B"));
    }
}
