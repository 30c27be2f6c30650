// One harvest run, start to finish.
//
//   snapshot -> outfit scopes -> card scopes -> part lists -> image join -> corrections
//   -> image join -> song matching -> derived fields -> snapshot -> cache index
//
// A chapter page that cannot be fetched aborts the run before anything is
// written; image failures only leave fields empty.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use lookbook_archive::{FetchCache, Throttle};
use lookbook_common::{Config, FileConfig};
use tracing::{info, warn};

use crate::catalog::snapshot::{self, SNAPSHOT_FILE};
use crate::corrections::{
    load_document, CorrectionData, CorrectionOverlay, CorrectionReport, KnownTypos, PatchStats,
};
use crate::extractor::PageExtractor;
use crate::images::{ImageLoader, ImageStore};
use crate::perceptual::{resolve_songs, SongMatchReport};
use crate::reconcile::{Reconciler, ScopeReport};

#[derive(Debug, Default)]
pub struct HarvestReport {
    pub outfit_scopes: Vec<ScopeReport>,
    pub card_scopes: Vec<ScopeReport>,
    pub parts: usize,
    pub corrections: Option<CorrectionReport>,
    pub known_typos: Option<PatchStats>,
    pub songs: SongMatchReport,
}

pub struct Harvest {
    config: Config,
    file_config: FileConfig,
    cache: Arc<FetchCache>,
    extractor: Arc<dyn PageExtractor>,
}

impl Harvest {
    pub fn new(
        config: Config,
        file_config: FileConfig,
        cache: Arc<FetchCache>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Self {
        Self {
            config,
            file_config,
            cache,
            extractor,
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.config.output_dir.join(SNAPSHOT_FILE)
    }

    /// Run once. The cache index is written even when the run fails.
    pub async fn run(&self) -> Result<HarvestReport> {
        let result = self.reconcile_and_save().await;
        let persisted = self
            .cache
            .persist()
            .await
            .context("Failed to write fetch cache index");

        if let (Err(_), Err(e)) = (&result, &persisted) {
            warn!(error = %e, "Cache index not written after failed run");
        }
        let report = result?;
        persisted?;
        Ok(report)
    }

    async fn reconcile_and_save(&self) -> Result<HarvestReport> {
        let catalog = snapshot::load(&self.snapshot_path()).await.into_shared();

        let store = Arc::new(ImageStore::new(
            self.cache.clone(),
            Throttle::new(self.file_config.fetch.concurrency),
            &self.config.output_dir,
            &self.config.custom_dir,
        ));
        let images = Arc::new(ImageLoader::new(store, catalog.clone()));
        let mut reconciler = Reconciler::new(catalog.clone(), images.clone());
        let mut report = HarvestReport::default();

        for page in &self.file_config.outfit_pages {
            let fetched = self
                .cache
                .get(&page.url)
                .await
                .with_context(|| format!("Failed to fetch outfit page {}", page.url))?;
            let parsed = self.extractor.outfit_page(&page.url, &fetched.body)?;
            info!(url = page.url.as_str(), outfits = parsed.outfits.len(), "Outfit page extracted");
            report
                .outfit_scopes
                .push(reconciler.reconcile_outfit_page(&parsed).await?);
        }

        for page in &self.file_config.card_pages {
            let fetched = self
                .cache
                .get(&page.url)
                .await
                .with_context(|| format!("Failed to fetch card page {}", page.url))?;
            let parsed = self.extractor.card_page(&page.url, &fetched.body)?;
            info!(url = page.url.as_str(), cards = parsed.cards.len(), "Card page extracted");
            report
                .card_scopes
                .push(reconciler.reconcile_card_page(&parsed).await?);
        }

        for page in &self.file_config.part_pages {
            let fetched = self
                .cache
                .get(&page.url)
                .await
                .with_context(|| format!("Failed to fetch part page {}", page.url))?;
            let parsed = self.extractor.part_page(&page.url, &fetched.body)?;
            info!(url = page.url.as_str(), parts = parsed.parts.len(), "Part page extracted");
            report.parts += reconciler.reconcile_part_page(&parsed).await?;
        }

        images.join_all().await;

        let overlay = CorrectionOverlay::new(catalog.clone(), images.clone());
        if let Some(data) = load_document::<CorrectionData>(&self.config.corrections_path).await? {
            report.corrections = Some(overlay.apply(&data).await?);
        }
        if let Some(doc) = load_document::<KnownTypos>(&self.config.known_typos_path).await? {
            report.known_typos = Some(overlay.apply_known_typos(&doc).await?);
        }

        images.join_all().await;

        report.songs =
            resolve_songs(&catalog, &self.config.output_dir, &self.file_config.matcher).await?;

        let mut catalog = catalog.lock().await;
        catalog.derive_fields();
        snapshot::save(&catalog, &self.snapshot_path()).await?;

        info!(
            coordinates = catalog.coordinates.len(),
            items = catalog.coordinate_items.len(),
            cards = catalog.cards.len(),
            "Harvest complete"
        );
        Ok(report)
    }
}
