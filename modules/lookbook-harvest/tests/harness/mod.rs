//! Shared fixtures for the harvest integration tests.
//!
//! Fakes the network (`MockTransport`) and the filesystem (a temp dir per
//! test). Everything else is the real code path.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lookbook_archive::testing::MockTransport;
use lookbook_archive::{FetchCache, RetryPolicy, Throttle};
use lookbook_common::Config;
use lookbook_harvest::catalog::{Catalog, SharedCatalog};
use lookbook_harvest::images::{ImageLoader, ImageStore};
use lookbook_harvest::reconcile::{
    BrandTuple, CardPage, CardTuple, OutfitPage, OutfitTuple, PieceTuple, Reconciler,
};
use tempfile::TempDir;

pub fn no_wait() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        delay: Duration::from_millis(1),
    }
}

pub async fn open_cache(dir: &Path, transport: Arc<MockTransport>) -> Arc<FetchCache> {
    Arc::new(
        FetchCache::open(dir, transport, Duration::ZERO, no_wait())
            .await
            .unwrap(),
    )
}

/// A catalog wired to an image loader over a mocked network.
pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub transport: Arc<MockTransport>,
    pub catalog: SharedCatalog,
    pub images: Arc<ImageLoader>,
}

impl Harness {
    pub async fn new(transport: MockTransport) -> Self {
        Self::with_catalog(Catalog::new(), transport).await
    }

    pub async fn with_catalog(catalog: Catalog, transport: MockTransport) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let transport = Arc::new(transport);
        let cache = open_cache(&config.cache_dir, transport.clone()).await;
        let catalog = catalog.into_shared();
        let store = Arc::new(ImageStore::new(
            cache,
            Throttle::new(4),
            &config.output_dir,
            &config.custom_dir,
        ));
        let images = Arc::new(ImageLoader::new(store, catalog.clone()));
        Self {
            dir,
            config,
            transport,
            catalog,
            images,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.catalog.clone(), self.images.clone())
    }

    pub fn output(&self, relative: &str) -> PathBuf {
        self.config.output_dir.join(relative)
    }
}

// ---------------------------------------------------------------------------
// Tuple builders
// ---------------------------------------------------------------------------

/// An outfit with one piece per `(category, seal_id)`.
pub fn outfit(title: &str, pieces: &[(&str, &str)]) -> OutfitTuple {
    OutfitTuple {
        title: title.to_string(),
        star: Some(3),
        brand: Some(BrandTuple {
            name: "Lumiere".to_string(),
            image_url: None,
        }),
        pieces: pieces
            .iter()
            .map(|(category, seal)| PieceTuple {
                category: category.to_string(),
                seal_id: Some(seal.to_string()),
                image_url: None,
                point: 10,
            })
            .collect(),
        ..Default::default()
    }
}

pub fn outfit_page(chapter: &str, outfits: Vec<OutfitTuple>) -> OutfitPage {
    OutfitPage {
        chapter_id: chapter.to_string(),
        chapter_name: format!("Chapter {chapter}"),
        outfits,
    }
}

pub fn card(front: &str, back: Option<&str>, character: &str, coordinate: &str) -> CardTuple {
    CardTuple {
        image1_url: Some(front.to_string()),
        image2_url: back.map(String::from),
        character: character.to_string(),
        coordinate: coordinate.to_string(),
        star: 2,
        point: 100,
        ..Default::default()
    }
}

pub fn card_page(chapter: &str, cards: Vec<CardTuple>) -> CardPage {
    CardPage {
        chapter_id: chapter.to_string(),
        chapter_name: format!("Cards {chapter}"),
        cards,
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Art {
    Horizontal,
    Vertical,
}

/// A 320x448 card back with a smooth gradient across the art region.
pub fn card_back_png(art: Art) -> Vec<u8> {
    let img = RgbImage::from_fn(320, 448, |x, y| {
        let v = match art {
            Art::Horizontal => (x * 255 / 319) as u8,
            Art::Vertical => (y * 255 / 447) as u8,
        };
        Rgb([v, v, v])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn small_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
