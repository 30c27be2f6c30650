pub mod cache;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod throttle;
pub mod transport;

pub use cache::{CacheEntry, FetchCache, FetchSource, Fetched, RetryPolicy};
pub use error::{ArchiveError, Result};
pub use throttle::Throttle;
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse, Validators};
