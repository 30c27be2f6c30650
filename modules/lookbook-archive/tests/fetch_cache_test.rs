//! Fetch cache tests: scripted transport in, cache behavior out.
//!
//! Run with: cargo test -p lookbook-archive --test fetch_cache_test

use std::sync::Arc;
use std::time::Duration;

use lookbook_archive::testing::MockTransport;
use lookbook_archive::{ArchiveError, FetchCache, FetchSource, RetryPolicy};

const PAGE: &str = "https://example.com/item/1.html";

fn no_wait() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    }
}

async fn open(dir: &std::path::Path, transport: Arc<MockTransport>, freshness: Duration) -> FetchCache {
    FetchCache::open(dir, transport, freshness, no_wait())
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Revalidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_modified_returns_cached_bytes_without_new_slot() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        MockTransport::new()
            .on_ok(PAGE, "<html>v1</html>", "\"v1\"")
            .on_not_modified(PAGE),
    );
    let cache = open(dir.path(), transport.clone(), Duration::ZERO).await;

    let first = cache.get(PAGE).await.unwrap();
    assert_eq!(first.source, FetchSource::Downloaded);
    assert_eq!(cache.last_slot(), 1);

    let second = cache.get(PAGE).await.unwrap();
    assert_eq!(second.source, FetchSource::Revalidated);
    assert_eq!(second.body, first.body);
    assert_eq!(cache.last_slot(), 1, "304 must not allocate a slot");
    assert_eq!(cache.entry(PAGE).unwrap().slot, 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].validators.is_empty());
    assert_eq!(requests[1].validators.etag.as_deref(), Some("\"v1\""));
}

#[tokio::test]
async fn fresh_slot_skips_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new().on_ok(PAGE, "body", "\"a\""));
    let cache = open(dir.path(), transport.clone(), Duration::from_secs(600)).await;

    cache.get(PAGE).await.unwrap();
    let again = cache.get(PAGE).await.unwrap();

    assert_eq!(again.source, FetchSource::Fresh);
    assert_eq!(&again.body[..], b"body");
    assert_eq!(transport.request_count(PAGE), 1);
}

#[tokio::test]
async fn changed_representation_moves_to_a_new_slot() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        MockTransport::new()
            .on_ok(PAGE, "old", "\"1\"")
            .on_ok(PAGE, "new", "\"2\""),
    );
    let cache = open(dir.path(), transport, Duration::ZERO).await;

    let old = cache.get(PAGE).await.unwrap();
    let new = cache.get(PAGE).await.unwrap();

    assert_eq!(&new.body[..], b"new");
    assert_eq!(cache.entry(PAGE).unwrap().slot, 2);
    // The previous slot is left behind untouched.
    let old_path = old.slot_path.unwrap();
    assert_eq!(std::fs::read(old_path).unwrap(), b"old");
}

// ---------------------------------------------------------------------------
// Uncached and failing responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_without_validators_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new().on_ok_uncached(PAGE, "dynamic"));
    let cache = open(dir.path(), transport.clone(), Duration::from_secs(600)).await;

    let fetched = cache.get(PAGE).await.unwrap();
    assert_eq!(fetched.source, FetchSource::Uncached);
    assert!(fetched.slot_path.is_none());
    assert_eq!(cache.last_slot(), 0);

    cache.get(PAGE).await.unwrap();
    assert_eq!(transport.request_count(PAGE), 2);
}

#[tokio::test]
async fn error_status_fails_without_caching() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new().on_status(PAGE, 500));
    let cache = open(dir.path(), transport, Duration::ZERO).await;

    let err = cache.get(PAGE).await.unwrap_err();
    assert!(matches!(err, ArchiveError::HttpStatus { status: 500, .. }));
    assert_eq!(cache.last_slot(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        MockTransport::new()
            .on_network_error(PAGE)
            .on_network_error(PAGE)
            .on_ok(PAGE, "finally", "\"x\""),
    );
    let cache = open(dir.path(), transport.clone(), Duration::ZERO).await;

    let fetched = cache.get(PAGE).await.unwrap();
    assert_eq!(&fetched.body[..], b"finally");
    assert_eq!(transport.request_count(PAGE), 3);
}

#[tokio::test]
async fn retry_exhaustion_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(MockTransport::new().on_network_error(PAGE));
    let cache = open(dir.path(), transport.clone(), Duration::ZERO).await;

    let err = cache.get(PAGE).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(transport.request_count(PAGE), 3);
}

// ---------------------------------------------------------------------------
// Index persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn index_survives_reopen_and_keeps_slot_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let other = "https://example.com/item/2.html";
    let transport = Arc::new(
        MockTransport::new()
            .on_ok(PAGE, "one", "\"1\"")
            .on_ok_uncached(other, "two"),
    );

    let cache = open(dir.path(), transport, Duration::ZERO).await;
    cache.get(PAGE).await.unwrap();
    cache.get(other).await.unwrap();
    cache.persist().await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("_list.json")).unwrap()).unwrap();
    assert_eq!(raw.as_array().unwrap().len(), 1, "only slotted entries are written");

    let transport = Arc::new(
        MockTransport::new()
            .on_not_modified(PAGE)
            .on_ok("https://example.com/new.png", "png", "\"n\""),
    );
    let reopened = open(dir.path(), transport.clone(), Duration::ZERO).await;
    assert_eq!(reopened.entry(PAGE).unwrap().slot, 1);

    let hit = reopened.get(PAGE).await.unwrap();
    assert_eq!(hit.source, FetchSource::Revalidated);
    assert_eq!(&hit.body[..], b"one");

    reopened.get("https://example.com/new.png").await.unwrap();
    assert_eq!(reopened.last_slot(), 2);
}

#[tokio::test]
async fn malformed_index_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("_list.json"), "{ not json").unwrap();

    let transport = Arc::new(MockTransport::new().on_ok(PAGE, "fresh", "\"f\""));
    let cache = open(dir.path(), transport, Duration::ZERO).await;

    assert_eq!(cache.last_slot(), 0);
    assert_eq!(cache.get(PAGE).await.unwrap().source, FetchSource::Downloaded);
}

#[tokio::test]
async fn missing_slot_file_forces_full_download() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(
        MockTransport::new()
            .on_ok(PAGE, "first", "\"1\"")
            .on_ok(PAGE, "second", "\"1\""),
    );
    let cache = open(dir.path(), transport.clone(), Duration::from_secs(600)).await;

    let first = cache.get(PAGE).await.unwrap();
    std::fs::remove_file(first.slot_path.unwrap()).unwrap();

    let second = cache.get(PAGE).await.unwrap();
    assert_eq!(second.source, FetchSource::Downloaded);
    assert!(transport.requests()[1].validators.is_empty());
}
