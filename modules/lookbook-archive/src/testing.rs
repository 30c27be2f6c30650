// Test mock for the HTTP seam.
//
// MockTransport keeps a queue of scripted replies per URL. When a queue has a
// single reply left it is repeated, so a static page only needs one `.on_ok()`.
// Every request is recorded with the validators it carried.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ArchiveError, Result};
use crate::transport::{HttpTransport, TransportResponse, Validators};

#[derive(Debug, Clone)]
pub enum MockReply {
    Response(TransportResponse),
    NetworkError(String),
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub validators: Validators,
}

pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replace the script for a URL, e.g. between two harvest runs.
    pub fn rescript(&self, url: &str, replies: Vec<MockReply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(url.to_string(), replies.into());
    }

    fn push(self, url: &str, reply: MockReply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// A 200 reply carrying an ETag, for use with [`MockTransport::rescript`].
    pub fn ok_reply(body: impl Into<Bytes>, etag: &str) -> MockReply {
        MockReply::Response(TransportResponse {
            status: 200,
            validators: Validators {
                etag: Some(etag.to_string()),
                last_modified: None,
            },
            content_type: None,
            body: body.into(),
        })
    }

    /// 200 with an ETag, so the body is cached.
    pub fn on_ok(self, url: &str, body: impl Into<Bytes>, etag: &str) -> Self {
        self.push(url, Self::ok_reply(body, etag))
    }

    /// 200 without validators; the cache must pass it through uncached.
    pub fn on_ok_uncached(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.push(
            url,
            MockReply::Response(TransportResponse {
                status: 200,
                validators: Validators::default(),
                content_type: None,
                body: body.into(),
            }),
        )
    }

    pub fn on_not_modified(self, url: &str) -> Self {
        self.on_status(url, 304)
    }

    pub fn on_status(self, url: &str, status: u16) -> Self {
        self.push(
            url,
            MockReply::Response(TransportResponse {
                status,
                validators: Validators::default(),
                content_type: None,
                body: Bytes::new(),
            }),
        )
    }

    pub fn on_network_error(self, url: &str) -> Self {
        self.push(url, MockReply::NetworkError("connection reset".to_string()))
    }

    /// Hold every reply for `url` back by `delay`.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, validators: &Validators) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            validators: validators.clone(),
        });

        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.get_mut(url);
            match queue {
                Some(q) if q.len() > 1 => q.pop_front(),
                Some(q) => q.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(MockReply::Response(resp)) => Ok(resp),
            Some(MockReply::NetworkError(message)) => Err(ArchiveError::Network {
                url: url.to_string(),
                message,
            }),
            None => Ok(TransportResponse {
                status: 404,
                validators: Validators::default(),
                content_type: None,
                body: Bytes::new(),
            }),
        }
    }
}
