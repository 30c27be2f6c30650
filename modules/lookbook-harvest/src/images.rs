// Image materialization.
//
// Every image field of a catalog entity is mirrored to
// `<output>/<dir>/<id:06><suffix><ext>`. `ImageStore` does one download (or
// custom-dir copy) and `ImageLoader` tracks the outstanding ones, so repeated
// requests for the same field and URL share a single operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use lookbook_archive::{FetchCache, Throttle};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, SharedCatalog};

/// Which image field of which entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSlot {
    Brand,
    Coordinate,
    CoordinateThumbnail,
    CoordinateItem,
    CardFront,
    CardBack,
    Part,
}

impl ImageSlot {
    pub fn directory(&self) -> &'static str {
        match self {
            Self::Brand => "brands",
            Self::Coordinate | Self::CoordinateThumbnail => "coordinates",
            Self::CoordinateItem => "coordinate-items",
            Self::CardFront | Self::CardBack => "cards",
            Self::Part => "parts",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::CoordinateThumbnail => "-thumb",
            Self::CardFront => "-1",
            Self::CardBack => "-2",
            _ => "",
        }
    }
}

/// One image field of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageTarget {
    pub slot: ImageSlot,
    pub id: i32,
}

impl ImageTarget {
    pub fn new(slot: ImageSlot, id: i32) -> Self {
        Self { slot, id }
    }

    /// File name without extension, e.g. `000012-thumb`.
    pub fn stem(&self) -> String {
        format!("{:06}{}", self.id, self.slot.suffix())
    }

    /// Local path for `url`, keeping the extension of its last path segment.
    pub fn file_path(&self, output_dir: &Path, url: &str) -> PathBuf {
        let mut name = self.stem();
        if let Some(ext) = extension_of(url) {
            name.push('.');
            name.push_str(&ext);
        }
        output_dir.join(self.slot.directory()).join(name)
    }

    /// Write `value` into the field this target names. Returns false when the
    /// entity is gone (pruned while the download was in flight).
    pub fn apply(&self, catalog: &mut Catalog, value: Option<String>) -> bool {
        let id = &self.id;
        match self.slot {
            ImageSlot::Brand => catalog.brands.get_mut(id).map(|e| e.image_url = value),
            ImageSlot::Coordinate => catalog.coordinates.get_mut(id).map(|e| e.image_url = value),
            ImageSlot::CoordinateThumbnail => catalog
                .coordinates
                .get_mut(id)
                .map(|e| e.thumbnail_url = value),
            ImageSlot::CoordinateItem => catalog
                .coordinate_items
                .get_mut(id)
                .map(|e| e.image_url = value),
            ImageSlot::CardFront => catalog.cards.get_mut(id).map(|e| e.image1_url = value),
            ImageSlot::CardBack => catalog.cards.get_mut(id).map(|e| e.image2_url = value),
            ImageSlot::Part => catalog.parts.get_mut(id).map(|e| e.image_url = value),
        }
        .is_some()
    }
}

fn extension_of(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Downloads (or copies) one image to its place in the output tree.
pub struct ImageStore {
    cache: Arc<FetchCache>,
    throttle: Throttle,
    output_dir: PathBuf,
    custom_dir: PathBuf,
}

impl ImageStore {
    pub fn new(
        cache: Arc<FetchCache>,
        throttle: Throttle,
        output_dir: impl Into<PathBuf>,
        custom_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            throttle,
            output_dir: output_dir.into(),
            custom_dir: custom_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Mirror `url` for `target`. Returns the URL on success. On any failure
    /// (or an empty URL) the stale file is removed and `None` comes back.
    pub async fn materialize(&self, url: Option<&str>, target: ImageTarget) -> Option<String> {
        let dir = self.output_dir.join(target.slot.directory());
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            remove_stale(&dir, &target.stem(), None).await;
            return None;
        };

        let dest = target.file_path(&self.output_dir, url);
        let _permit = self.throttle.acquire().await;

        match self.write(url, &dest).await {
            Ok(()) => {
                remove_stale(&dir, &target.stem(), Some(&dest)).await;
                info!(url, path = %dest.display(), "Image saved");
                Some(url.to_string())
            }
            Err(e) => {
                warn!(url, target = ?target, error = %e, "Image fetch failed");
                remove_stale(&dir, &target.stem(), None).await;
                None
            }
        }
    }

    async fn write(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if !url.starts_with("http") {
            let source = self.custom_dir.join(url);
            tokio::fs::copy(&source, dest).await?;
            debug!(source = %source.display(), "Copied custom image");
            return Ok(());
        }

        let fetched = self.cache.get(url).await?;
        match fetched.slot_path {
            Some(slot) => {
                tokio::fs::copy(&slot, dest).await?;
            }
            None => tokio::fs::write(dest, &fetched.body).await?,
        }
        Ok(())
    }
}

/// Delete files in `dir` named `stem.*`, except `keep`.
async fn remove_stale(dir: &Path, stem: &str, keep: Option<&Path>) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if keep == Some(path.as_path()) {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove stale image");
            }
        }
    }
}

/// Handle on an outstanding materialization. Resolves to the stored URL.
pub type PendingImage = Shared<BoxFuture<'static, Option<String>>>;

struct Pending {
    url: Option<String>,
    generation: u64,
    handle: PendingImage,
}

/// Registry of image operations for one run.
///
/// A request for a target that already has an operation for the same URL
/// joins it, unless that operation finished without a file. Completed
/// operations write their result back only if no newer request replaced them.
pub struct ImageLoader {
    store: Arc<ImageStore>,
    catalog: SharedCatalog,
    pending: Arc<Mutex<HashMap<ImageTarget, Pending>>>,
    generation: AtomicU64,
}

impl ImageLoader {
    pub fn new(store: Arc<ImageStore>, catalog: SharedCatalog) -> Self {
        Self {
            store,
            catalog,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Ask for `target` to hold `url`. Must be called from within the runtime.
    pub fn request(&self, target: ImageTarget, url: Option<String>) -> PendingImage {
        let mut pending = lock(&self.pending);
        if let Some(current) = pending.get(&target) {
            let failed = url.is_some() && matches!(current.handle.peek(), Some(None));
            if current.url == url && !failed {
                return current.handle.clone();
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = pending.get(&target).map(|p| p.handle.clone());
        let handle = self.start(target, url.clone(), generation, previous);
        pending.insert(
            target,
            Pending {
                url,
                generation,
                handle: handle.clone(),
            },
        );
        handle
    }

    /// Operations on one target run in request order, so a superseded
    /// download never lands on disk after its replacement.
    fn start(
        &self,
        target: ImageTarget,
        url: Option<String>,
        generation: u64,
        previous: Option<PendingImage>,
    ) -> PendingImage {
        let store = self.store.clone();
        let catalog = self.catalog.clone();
        let pending = self.pending.clone();

        let handle = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            let stored = store.materialize(url.as_deref(), target).await;

            let mut catalog = catalog.lock().await;
            let current = lock(&pending)
                .get(&target)
                .is_some_and(|p| p.generation == generation);
            if current && !target.apply(&mut catalog, stored.clone()) {
                debug!(target = ?target, "Image target no longer exists");
            }
            stored
        }
        .boxed()
        .shared();

        tokio::spawn(handle.clone());
        handle
    }

    /// Number of operations still running.
    pub fn outstanding(&self) -> usize {
        lock(&self.pending)
            .values()
            .filter(|p| p.handle.peek().is_none())
            .count()
    }

    /// Wait until every requested image has settled.
    pub async fn join_all(&self) {
        loop {
            let handles: Vec<PendingImage> = lock(&self.pending)
                .values()
                .filter(|p| p.handle.peek().is_none())
                .map(|p| p.handle.clone())
                .collect();
            if handles.is_empty() {
                break;
            }
            info!(count = handles.len(), "Waiting for image downloads");
            futures::future::join_all(handles).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
