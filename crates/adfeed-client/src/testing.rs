use crate::transport::{AdTransport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub enum Reply {
    Body(Bytes),
    Fail,
}

/// In-memory transport. Ad requests (URLs carrying `inv_code`) consume the
/// scripted replies, falling back to `fallback` once they run out. Every
/// other URL is treated as a beacon and answered with an empty body.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new(fallback: Reply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn ad_requests(&self) -> Vec<(String, Instant)> {
        self.calls
            .lock()
            .iter()
            .filter(|(url, _)| is_ad_request(url))
            .cloned()
            .collect()
    }

    pub fn beacons(&self) -> Vec<String> {
        self.urls().into_iter().filter(|url| !is_ad_request(url)).collect()
    }
}

fn is_ad_request(url: &str) -> bool {
    url.contains("inv_code=")
}

#[async_trait]
impl AdTransport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<Bytes, TransportError> {
        self.calls.lock().push((url.to_string(), Instant::now()));
        if !is_ad_request(url) {
            return Ok(Bytes::new());
        }
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Body(body) => Ok(body),
            Reply::Fail => Err(TransportError::Status(503)),
        }
    }
}

pub fn fill_body(advertiser: &str) -> Bytes {
    let value = json!({
        "advertiser_name": advertiser,
        "clickthrough_url": format!("https://{advertiser}.example/landing"),
        "image_url": format!("https://{advertiser}.example/image.png"),
        "caption": "caption",
        "heading": "heading",
        "clickthrough_pixels": [format!("http://px.test/{advertiser}/click")],
        "impression_pixels": [
            format!("http://px.test/{advertiser}/imp1"),
            format!("http://px.test/{advertiser}/imp2"),
        ],
    });
    Bytes::from(value.to_string())
}

pub fn no_fill_body() -> Bytes {
    Bytes::from_static(br#"{"status":"no_fill"}"#)
}
