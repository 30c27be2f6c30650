// HTTP seam for the fetch cache. Production uses reqwest; tests swap in
// `testing::MockTransport`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderName, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

use crate::error::{ArchiveError, Result};

/// Validators remembered from a previous response, sent back on the next GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    /// Raw `Last-Modified` header value, echoed as `If-Modified-Since`.
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A completed response. Non-2xx statuses are returned, not raised;
/// only transport failures become errors.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub validators: Validators,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a GET, conditional when `validators` is non-empty.
    async fn get(&self, url: &str, validators: &Validators) -> Result<TransportResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lookbook-harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ArchiveError::Network {
                url: String::new(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, validators: &Validators) -> Result<TransportResponse> {
        let network = |e: reqwest::Error| ArchiveError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut req = self.client.get(url);
        if let Some(ref etag) = validators.etag {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(ref last_modified) = validators.last_modified {
            req = req.header(IF_MODIFIED_SINCE, last_modified);
        }

        let resp = req.send().await.map_err(network)?;

        let header = |name: HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let status = resp.status().as_u16();
        let validators = Validators {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };
        let content_type = header(CONTENT_TYPE);

        let body = resp.bytes().await.map_err(network)?;

        Ok(TransportResponse {
            status,
            validators,
            content_type,
            body,
        })
    }
}
