//! Back-art matching tests: fingerprints, thresholds and the song pass.
//!
//! Run with: cargo test -p lookbook-harvest --test perceptual_test

mod harness;

use std::path::Path;

use harness::{card_back_png, Art};
use lookbook_common::{Card, MatcherConfig, Song};
use lookbook_harvest::catalog::Catalog;
use lookbook_harvest::images::{ImageSlot, ImageTarget};
use lookbook_harvest::perceptual::{
    resolve_songs, song_reference_name, Fingerprint, PerceptualMatcher, SONG_ART_DIR,
};

// a and d are orthogonal with zero mean, so corr(a, a + c*d) = 1 / sqrt(1 + c^2).
const A: [f64; 4] = [1.0, -1.0, 1.0, -1.0];
const D: [f64; 4] = [1.0, 1.0, -1.0, -1.0];

fn shifted(c: f64) -> Vec<f64> {
    A.iter().zip(D).map(|(a, d)| a + c * d).collect()
}

fn matcher_with_reference() -> PerceptualMatcher {
    let mut matcher = PerceptualMatcher::new(MatcherConfig::default());
    matcher.add_reference(1, Fingerprint::new(0, A.to_vec()));
    matcher
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

#[test]
fn close_candidate_within_hamming_bound_matches() {
    let matcher = matcher_with_reference();
    let candidate = Fingerprint::new(0b111, shifted(0.33));

    let m = matcher.best_match(&candidate).expect("should match");
    assert_eq!(m.id, 1);
    assert_eq!(m.distance, 3);
    assert!((m.correlation - 0.9496).abs() < 1e-3);
}

#[test]
fn weak_correlation_is_rejected() {
    let matcher = matcher_with_reference();
    let candidate = Fingerprint::new(0, shifted(3f64.sqrt()));

    let reference = Fingerprint::new(0, A.to_vec());
    assert!((reference.correlation(&candidate) - 0.5).abs() < 1e-9);
    assert_eq!(matcher.best_match(&candidate), None);
}

#[test]
fn correlation_equal_to_the_threshold_is_rejected() {
    let candidate = Fingerprint::new(0, shifted(0.33));
    let reference = Fingerprint::new(0, A.to_vec());
    let config = MatcherConfig {
        min_correlation: reference.correlation(&candidate),
        ..MatcherConfig::default()
    };
    let mut matcher = PerceptualMatcher::new(config);
    matcher.add_reference(1, reference);

    assert_eq!(matcher.best_match(&candidate), None);
}

#[test]
fn hamming_bound_filters_before_correlation() {
    let matcher = matcher_with_reference();
    let candidate = Fingerprint::new((1u64 << 20) - 1, A.to_vec());

    assert_eq!(matcher.best_match(&candidate), None);
}

#[test]
fn highest_correlation_wins() {
    let mut matcher = matcher_with_reference();
    matcher.add_reference(2, Fingerprint::new(0, shifted(0.1)));

    let m = matcher
        .best_match(&Fingerprint::new(0, shifted(0.12)))
        .expect("should match");
    assert_eq!(m.id, 2);
}

#[test]
fn re_adding_a_reference_replaces_it() {
    let mut matcher = matcher_with_reference();
    matcher.add_reference(1, Fingerprint::new(0, D.to_vec()));
    assert_eq!(matcher.len(), 1);
    assert_eq!(matcher.best_match(&Fingerprint::new(0, A.to_vec())), None);
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

fn decode(bytes: &[u8]) -> image::DynamicImage {
    image::load_from_memory(bytes).unwrap()
}

#[test]
fn same_art_matches_and_different_art_does_not() {
    let mut matcher = PerceptualMatcher::new(MatcherConfig::default());
    let reference = matcher.candidate(&decode(&card_back_png(Art::Horizontal)));
    matcher.add_reference(7, reference);

    let same = matcher.candidate(&decode(&card_back_png(Art::Horizontal)));
    let m = matcher.best_match(&same).expect("identical art should match");
    assert_eq!((m.id, m.distance), (7, 0));

    let other = matcher.candidate(&decode(&card_back_png(Art::Vertical)));
    assert_eq!(matcher.best_match(&other), None);
}

#[test]
fn crop_has_the_configured_size() {
    let config = MatcherConfig::default();
    let matcher = PerceptualMatcher::new(config.clone());
    let cropped = matcher.crop(&decode(&card_back_png(Art::Vertical)));
    assert_eq!(cropped.width(), config.crop_width);
    assert_eq!(cropped.height(), config.crop_height);
}

// ---------------------------------------------------------------------------
// Song pass
// ---------------------------------------------------------------------------

fn back_url(id: i32) -> String {
    format!("https://cdn.test/backs/{id}.png")
}

fn card_with_back(output: &Path, id: i32, song_id: i32, art: Art) -> Card {
    let url = back_url(id);
    let path = ImageTarget::new(ImageSlot::CardBack, id).file_path(output, &url);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, card_back_png(art)).unwrap();

    let mut card = Card::with_id(id);
    card.coordinate = "Starlight".into();
    card.character_id = 1;
    card.song_id = song_id;
    card.image2_url = Some(url);
    card
}

fn song(id: i32, name: &str) -> Song {
    let mut s = Song::with_id(id);
    s.name = name.to_string();
    s
}

#[tokio::test]
async fn labelled_card_bootstraps_a_reference_for_unlabelled_ones() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();

    let mut catalog = Catalog::new();
    catalog.songs.add(song(1, "Hello")).unwrap();
    catalog.cards.add(card_with_back(output, 1, 1, Art::Horizontal)).unwrap();
    catalog.cards.add(card_with_back(output, 2, 0, Art::Horizontal)).unwrap();
    catalog.cards.add(card_with_back(output, 3, 0, Art::Vertical)).unwrap();
    let catalog = catalog.into_shared();

    let report = resolve_songs(&catalog, output, &MatcherConfig::default())
        .await
        .unwrap();

    assert_eq!(report.bootstrapped, 1);
    assert_eq!(report.references, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(report.unmatched, 1);
    assert!(output.join(SONG_ART_DIR).join("000001-Hello.png").is_file());

    let catalog = catalog.lock().await;
    assert_eq!(catalog.cards.get(&2).unwrap().song_id, 1);
    assert_eq!(catalog.cards.get(&3).unwrap().song_id, 0);
}

#[tokio::test]
async fn stored_reference_is_reused_on_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();

    let mut first = Catalog::new();
    first.songs.add(song(1, "Hello")).unwrap();
    first.cards.add(card_with_back(output, 1, 1, Art::Horizontal)).unwrap();
    resolve_songs(&first.into_shared(), output, &MatcherConfig::default())
        .await
        .unwrap();

    // The labelled card is gone; only the stored reference remains.
    let mut second = Catalog::new();
    second.songs.add(song(1, "Hello")).unwrap();
    second.cards.add(card_with_back(output, 5, 0, Art::Horizontal)).unwrap();
    let second = second.into_shared();

    let report = resolve_songs(&second, output, &MatcherConfig::default())
        .await
        .unwrap();

    assert_eq!(report.bootstrapped, 0);
    assert_eq!(report.references, 1);
    assert_eq!(second.lock().await.cards.get(&5).unwrap().song_id, 1);
}

#[tokio::test]
async fn songs_with_the_same_slug_keep_separate_references() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();

    let mut catalog = Catalog::new();
    catalog.songs.add(song(1, "A/B")).unwrap();
    catalog.songs.add(song(2, "A?B")).unwrap();
    catalog.cards.add(card_with_back(output, 1, 1, Art::Horizontal)).unwrap();
    catalog.cards.add(card_with_back(output, 2, 2, Art::Vertical)).unwrap();
    catalog.cards.add(card_with_back(output, 3, 0, Art::Vertical)).unwrap();
    let catalog = catalog.into_shared();

    let report = resolve_songs(&catalog, output, &MatcherConfig::default())
        .await
        .unwrap();

    assert_eq!(report.bootstrapped, 2);
    assert!(output.join(SONG_ART_DIR).join(song_reference_name(1, "A/B")).is_file());
    assert!(output.join(SONG_ART_DIR).join(song_reference_name(2, "A?B")).is_file());
    assert_eq!(catalog.lock().await.cards.get(&3).unwrap().song_id, 2);
}

#[tokio::test]
async fn explicit_labels_are_never_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path();

    let mut catalog = Catalog::new();
    catalog.songs.add(song(1, "Hello")).unwrap();
    catalog.songs.add(song(2, "Goodbye")).unwrap();
    catalog.cards.add(card_with_back(output, 1, 1, Art::Horizontal)).unwrap();
    catalog.cards.add(card_with_back(output, 2, 2, Art::Horizontal)).unwrap();
    let catalog = catalog.into_shared();

    resolve_songs(&catalog, output, &MatcherConfig::default())
        .await
        .unwrap();

    let catalog = catalog.lock().await;
    assert_eq!(catalog.cards.get(&1).unwrap().song_id, 1);
    assert_eq!(catalog.cards.get(&2).unwrap().song_id, 2);
}

#[tokio::test]
async fn cards_without_a_back_file_are_unmatched() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = Catalog::new();
    let mut card = Card::with_id(1);
    card.coordinate = "Starlight".into();
    card.character_id = 1;
    card.image2_url = Some(back_url(1));
    catalog.cards.add(card).unwrap();

    let report = resolve_songs(&catalog.into_shared(), dir.path(), &MatcherConfig::default())
        .await
        .unwrap();
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.references, 0);
}
