use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Default number of image downloads allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 31;

/// Counting admission gate for outbound downloads. Cloning shares the gate.
#[derive(Clone)]
pub struct Throttle {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        info!("Throttle initialized (max_concurrent={limit})");
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is owned here and never closed.
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .unwrap_or_else(|_| unreachable!("throttle semaphore closed"))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
