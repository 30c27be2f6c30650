//! End-to-end harvest runs over a mocked network.
//!
//! Run with: cargo test -p lookbook-harvest --test harvest_test

mod harness;

use std::path::Path;
use std::sync::Arc;

use harness::{card_back_png, open_cache, small_png, Art};
use lookbook_archive::testing::{MockReply, MockTransport};
use lookbook_archive::{TransportResponse, Validators};
use lookbook_common::{Config, FileConfig, PageConfig};
use lookbook_harvest::catalog::snapshot;
use lookbook_harvest::extractor::JsonPageExtractor;
use lookbook_harvest::Harvest;
use serde_json::json;

const OUTFITS: &str = "https://pages.test/outfits/1.json";
const CARDS: &str = "https://pages.test/cards/1.json";
const PARTS: &str = "https://pages.test/parts.json";
const BERET: &str = "https://cdn.test/parts/beret.png";
const LOGO: &str = "https://cdn.test/brands/lumiere.png";
const FRONT_1: &str = "https://cdn.test/cards/V01-001.png";
const FRONT_2: &str = "https://cdn.test/cards/V01-002.png";
const BACK_1: &str = "https://cdn.test/backs/V01-001.png";
const BACK_2: &str = "https://cdn.test/backs/V01-002.png";

fn outfit_page() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "chapter_id": "1",
        "chapter_name": "Spring",
        "outfits": [
            {
                "title": "Starlight",
                "star": 4,
                "brand": {"name": "Lumiere", "image_url": LOGO},
                "period": "2024年5月1日（水）～6月30日（日）",
                "pieces": [
                    {"category": "Tops", "seal_id": "S1", "point": 40},
                    {"category": "Shoes", "seal_id": "S2", "point": 20}
                ]
            },
            {
                "title": "Moonlight",
                "star": 3,
                "brand": {"name": "Lumiere", "image_url": LOGO},
                "pieces": [
                    {"category": "Tops", "seal_id": "S1", "point": 40},
                    {"category": "Bottoms", "seal_id": "S3", "point": 30}
                ]
            }
        ]
    }))
    .unwrap()
}

fn card_page() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "chapter_id": "1",
        "chapter_name": "Spring",
        "cards": [
            {
                "image1_url": FRONT_1, "image2_url": BACK_1,
                "character": "Himari", "coordinate": "Starlight",
                "song": "Hello", "star": 3, "point": 300, "is_chance": true
            },
            {
                "image1_url": FRONT_2, "image2_url": BACK_2,
                "character": "Aoi", "coordinate": "Moonlight",
                "star": 2, "point": 200
            }
        ]
    }))
    .unwrap()
}

fn part_page() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "parts": [
            {"category": "Hats", "name": "Beret", "description": "Wool", "image_url": BERET},
            {"category": "Hats", "name": ""}
        ]
    }))
    .unwrap()
}

fn network() -> MockTransport {
    MockTransport::new()
        .on_ok(OUTFITS, outfit_page(), "\"o1\"")
        .on_ok(CARDS, card_page(), "\"k1\"")
        .on_ok(PARTS, part_page(), "\"p1\"")
        .on_ok(BERET, small_png(), "\"beret\"")
        .on_ok(LOGO, small_png(), "\"logo\"")
        .on_ok(FRONT_1, small_png(), "\"f1\"")
        .on_ok(FRONT_2, small_png(), "\"f2\"")
        .on_ok(BACK_1, card_back_png(Art::Horizontal), "\"b1\"")
        .on_ok(BACK_2, card_back_png(Art::Horizontal), "\"b2\"")
}

fn file_config() -> FileConfig {
    FileConfig {
        outfit_pages: vec![PageConfig { url: OUTFITS.into() }],
        card_pages: vec![PageConfig { url: CARDS.into() }],
        part_pages: vec![PageConfig { url: PARTS.into() }],
        ..Default::default()
    }
}

async fn harvest(root: &Path, transport: Arc<MockTransport>) -> Harvest {
    let config = Config::rooted_at(root);
    let cache = open_cache(&config.cache_dir, transport).await;
    Harvest::new(config, file_config(), cache, Arc::new(JsonPageExtractor))
}

#[tokio::test]
async fn full_run_builds_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::rooted_at(dir.path());
    std::fs::write(
        &config.corrections_path,
        r#"{"coordinates": [{"key": "Name", "data": {"name": "Moonlight", "group": "Cool"}}]}"#,
    )
    .unwrap();

    let transport = Arc::new(network());
    let report = harvest(dir.path(), transport.clone()).await.run().await.unwrap();

    assert_eq!(report.outfit_scopes.len(), 1);
    assert_eq!(report.card_scopes.len(), 1);
    assert_eq!(report.parts, 1, "the unnamed part is skipped");
    assert_eq!(report.corrections.unwrap().coordinates.patched, 1);
    assert!(report.known_typos.is_none());
    assert_eq!(report.songs.bootstrapped, 1);
    assert_eq!(report.songs.matched, 1);
    assert_eq!(transport.request_count(LOGO), 1);

    let catalog = snapshot::load(&config.output_dir.join(snapshot::SNAPSHOT_FILE)).await;
    assert_eq!(catalog.coordinates.len(), 2);
    assert_eq!(catalog.coordinate_items.len(), 3, "shared S1 is stored once");

    let starlight = catalog.coordinates.find(|c| c.name == "Starlight").unwrap();
    let moonlight = catalog.coordinates.find(|c| c.name == "Moonlight").unwrap();
    assert!(starlight.has_chance);
    assert!(!moonlight.has_chance);
    assert_eq!(moonlight.group.as_deref(), Some("Cool"));
    assert_eq!(moonlight.linked_item_ids.len(), 1);

    let chapter = catalog.outfit_chapters.get(&"1".to_string()).unwrap();
    assert_eq!(chapter.start, starlight.start);
    assert!(chapter.start.is_some());

    let beret = catalog.parts.find(|p| p.name == "Beret").unwrap();
    let hats = catalog.part_categories.find(|c| c.name == "Hats").unwrap();
    assert_eq!(beret.category_id, hats.id);
    assert_eq!(beret.description.as_deref(), Some("Wool"));
    assert!(catalog.categories.find(|c| c.name == "Hats").is_none());

    let hello = catalog.songs.find(|s| s.name == "Hello").unwrap();
    assert!(catalog.cards.iter().all(|c| c.song_id == hello.id));
    assert_eq!(hello.singer_ids.len(), 2);

    assert!(config.output_dir.join("brands/000001.png").is_file());
    assert!(config.output_dir.join("parts/000001.png").is_file());
    assert!(config.output_dir.join("songs/000001-Hello.png").is_file());
    assert!(config.cache_dir.join("_list.json").is_file());
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::rooted_at(dir.path());
    let snapshot_path = config.output_dir.join(snapshot::SNAPSHOT_FILE);

    harvest(dir.path(), Arc::new(network())).await.run().await.unwrap();
    let first = std::fs::read(&snapshot_path).unwrap();

    let report = harvest(dir.path(), Arc::new(network())).await.run().await.unwrap();
    let second = std::fs::read(&snapshot_path).unwrap();

    let created: usize = report
        .outfit_scopes
        .iter()
        .chain(&report.card_scopes)
        .map(|s| s.created)
        .sum();
    let pruned: usize = report
        .outfit_scopes
        .iter()
        .chain(&report.card_scopes)
        .map(|s| s.pruned())
        .sum();
    assert_eq!(created, 0);
    assert_eq!(pruned, 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn cached_pages_are_revalidated_on_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    harvest(dir.path(), Arc::new(network())).await.run().await.unwrap();

    let transport = Arc::new(
        MockTransport::new()
            .on_not_modified(OUTFITS)
            .on_not_modified(CARDS)
            .on_not_modified(PARTS)
            .on_not_modified(BERET)
            .on_not_modified(LOGO)
            .on_not_modified(FRONT_1)
            .on_not_modified(FRONT_2)
            .on_not_modified(BACK_1)
            .on_not_modified(BACK_2),
    );
    harvest(dir.path(), transport.clone()).await.run().await.unwrap();

    let outfit_requests: Vec<_> = transport
        .requests()
        .into_iter()
        .filter(|r| r.url == OUTFITS)
        .collect();
    assert_eq!(outfit_requests.len(), 1);
    assert_eq!(outfit_requests[0].validators.etag.as_deref(), Some("\"o1\""));
}

#[tokio::test]
async fn page_failure_aborts_without_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::rooted_at(dir.path());
    let transport = Arc::new(network());
    transport.rescript(OUTFITS, vec![MockReply::Response(TransportResponse {
        status: 500,
        validators: Validators::default(),
        content_type: None,
        body: Default::default(),
    })]);

    let err = harvest(dir.path(), transport.clone()).await.run().await.unwrap_err();

    assert!(err.to_string().contains(OUTFITS));
    assert!(!config.output_dir.join(snapshot::SNAPSHOT_FILE).exists());
    assert!(config.cache_dir.join("_list.json").is_file());
    assert_eq!(transport.request_count(CARDS), 0);
}

#[tokio::test]
async fn failed_run_leaves_the_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::rooted_at(dir.path());
    let snapshot_path = config.output_dir.join(snapshot::SNAPSHOT_FILE);

    harvest(dir.path(), Arc::new(network())).await.run().await.unwrap();
    let before = std::fs::read(&snapshot_path).unwrap();

    let transport = Arc::new(network());
    transport.rescript(CARDS, vec![MockReply::NetworkError("connection refused".into())]);
    assert!(harvest(dir.path(), transport).await.run().await.is_err());

    assert_eq!(std::fs::read(&snapshot_path).unwrap(), before);
}
