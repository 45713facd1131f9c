use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Fetches a URL and hands back the body. Used for ad requests and beacons.
#[async_trait]
pub trait AdTransport: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<Bytes, TransportError>;
}

/// `reqwest` backed transport. Non-2xx statuses count as failures.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Requests are attempted once; retrying is the fetcher's job.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AdTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Bytes, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }
}
