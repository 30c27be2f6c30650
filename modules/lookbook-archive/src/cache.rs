// Conditional fetch cache: ETag/Last-Modified revalidation in front of a
// slot-numbered blob directory.
//
// Layout under the cache directory:
//   _list.json   index of url -> slot + validators, rewritten at shutdown
//   1, 2, 3 ...  response bodies, one file per slot
//
// A slot is never reused. When a URL gets a new representation it is written
// to a fresh slot and the old one is simply left behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lookbook_common::FetchConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::transport::{HttpTransport, TransportResponse, Validators};

const INDEX_FILE: &str = "_list.json";

/// One persisted index row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub slot: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn unslotted(url: &str) -> Self {
        Self {
            slot: 0,
            url: url.to_string(),
            etag: None,
            last_modified: None,
            validated_at: None,
        }
    }

    fn validators(&self) -> Validators {
        Validators {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}

#[derive(Default)]
struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    last_slot: u64,
}

/// Where the bytes of a [`Fetched`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Slot validated recently enough that no request was made.
    Fresh,
    /// Server answered 304 for the stored validators.
    Revalidated,
    /// New representation written to a new slot.
    Downloaded,
    /// Server sent no validators; nothing was cached.
    Uncached,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: String,
    pub body: Bytes,
    pub source: FetchSource,
    /// Backing slot file, when the body is cached.
    pub slot_path: Option<PathBuf>,
}

/// Fixed-delay retry for transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

enum Lookup {
    Fresh(u64),
    Revalidate(u64, Validators),
    Miss,
}

pub struct FetchCache {
    dir: PathBuf,
    index: Mutex<CacheIndex>,
    transport: Arc<dyn HttpTransport>,
    freshness: chrono::Duration,
    retry: RetryPolicy,
}

impl FetchCache {
    /// Open the cache directory, creating it if needed. A missing or
    /// unreadable index is treated as an empty cache.
    pub async fn open(
        dir: impl Into<PathBuf>,
        transport: Arc<dyn HttpTransport>,
        freshness: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let index = load_index(&dir.join(INDEX_FILE)).await;
        info!(
            dir = %dir.display(),
            entries = index.entries.len(),
            last_slot = index.last_slot,
            "Fetch cache opened"
        );

        Ok(Self {
            dir,
            index: Mutex::new(index),
            transport,
            freshness: chrono::Duration::from_std(freshness)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            retry,
        })
    }

    /// Open with tunables taken from the `[fetch]` config section.
    pub async fn open_with_config(
        dir: impl Into<PathBuf>,
        transport: Arc<dyn HttpTransport>,
        config: &FetchConfig,
    ) -> Result<Self> {
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            delay: Duration::from_millis(config.retry_delay_ms),
        };
        Self::open(
            dir,
            transport,
            Duration::from_secs(config.freshness_secs),
            retry,
        )
        .await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, slot: u64) -> PathBuf {
        self.dir.join(slot.to_string())
    }

    /// Current index row for a URL.
    pub fn entry(&self, url: &str) -> Option<CacheEntry> {
        self.lock().entries.get(url).cloned()
    }

    pub fn last_slot(&self) -> u64 {
        self.lock().last_slot
    }

    /// GET through the cache.
    pub async fn get(&self, url: &str) -> Result<Fetched> {
        match self.lookup(url) {
            Lookup::Fresh(slot) => {
                debug!(url, slot, "Cache fresh, skipping request");
                let path = self.slot_path(slot);
                let body = tokio::fs::read(&path).await?;
                Ok(Fetched {
                    url: url.to_string(),
                    body: Bytes::from(body),
                    source: FetchSource::Fresh,
                    slot_path: Some(path),
                })
            }
            Lookup::Revalidate(slot, validators) => {
                let resp = self.send_with_retry(url, &validators).await?;
                if resp.is_not_modified() {
                    debug!(url, slot, "Not modified");
                    self.touch(url);
                    let path = self.slot_path(slot);
                    let body = tokio::fs::read(&path).await?;
                    return Ok(Fetched {
                        url: url.to_string(),
                        body: Bytes::from(body),
                        source: FetchSource::Revalidated,
                        slot_path: Some(path),
                    });
                }
                self.store_response(url, resp).await
            }
            Lookup::Miss => {
                let resp = self.send_with_retry(url, &Validators::default()).await?;
                self.store_response(url, resp).await
            }
        }
    }

    /// Rewrite the index file from the in-memory mapping (slotted entries only).
    pub async fn persist(&self) -> Result<()> {
        let mut entries: Vec<CacheEntry> = {
            let index = self.lock();
            index
                .entries
                .values()
                .filter(|e| e.slot > 0)
                .cloned()
                .collect()
        };
        entries.sort_by_key(|e| e.slot);

        let json = serde_json::to_vec_pretty(&entries)?;
        let path = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{INDEX_FILE}.new"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(entries = entries.len(), "Fetch cache index written");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        // A panic while holding the guard leaves the map consistent; keep going.
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lookup(&self, url: &str) -> Lookup {
        let mut index = self.lock();
        if let Some(entry) = index.entries.get(url) {
            if entry.slot > 0 && self.slot_path(entry.slot).is_file() {
                let fresh = entry
                    .validated_at
                    .is_some_and(|at| Utc::now() - at < self.freshness);
                return if fresh {
                    Lookup::Fresh(entry.slot)
                } else {
                    Lookup::Revalidate(entry.slot, entry.validators())
                };
            }
        }
        index
            .entries
            .insert(url.to_string(), CacheEntry::unslotted(url));
        Lookup::Miss
    }

    fn touch(&self, url: &str) {
        if let Some(entry) = self.lock().entries.get_mut(url) {
            entry.validated_at = Some(Utc::now());
        }
    }

    async fn send_with_retry(&self, url: &str, validators: &Validators) -> Result<TransportResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.get(url, validators).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    warn!(url, attempt, error = %e, "Fetch failed, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn store_response(&self, url: &str, resp: TransportResponse) -> Result<Fetched> {
        if !resp.is_success() {
            warn!(url, status = resp.status, "Failed to GET");
            return Err(ArchiveError::HttpStatus {
                url: url.to_string(),
                status: resp.status,
            });
        }

        info!(
            url,
            content_type = resp.content_type.as_deref().unwrap_or("no Content-Type"),
            bytes = resp.body.len(),
            etag = resp.validators.etag.as_deref().unwrap_or(""),
            last_modified = resp.validators.last_modified.as_deref().unwrap_or(""),
            "GOT"
        );

        if resp.validators.is_empty() {
            return Ok(Fetched {
                url: url.to_string(),
                body: resp.body,
                source: FetchSource::Uncached,
                slot_path: None,
            });
        }

        let slot = {
            let mut index = self.lock();
            index.last_slot += 1;
            index.last_slot
        };

        let path = self.slot_path(slot);
        tokio::fs::write(&path, &resp.body).await?;

        self.lock().entries.insert(
            url.to_string(),
            CacheEntry {
                slot,
                url: url.to_string(),
                etag: resp.validators.etag,
                last_modified: resp.validators.last_modified,
                validated_at: Some(Utc::now()),
            },
        );

        Ok(Fetched {
            url: url.to_string(),
            body: resp.body,
            source: FetchSource::Downloaded,
            slot_path: Some(path),
        })
    }
}

async fn load_index(path: &Path) -> CacheIndex {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheIndex::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache index, starting empty");
            return CacheIndex::default();
        }
    };

    let rows: Vec<CacheEntry> = match serde_json::from_slice(&bytes) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed cache index, starting empty");
            return CacheIndex::default();
        }
    };

    let mut index = CacheIndex::default();
    for row in rows {
        if row.url.is_empty() {
            continue;
        }
        index.last_slot = index.last_slot.max(row.slot);
        index.entries.insert(row.url.clone(), row);
    }
    index
}
