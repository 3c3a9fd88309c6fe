use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use std::time::Duration;

use super::ContentLoader;
use crate::error::{Error, Result};
use crate::utils::ChunkData;

/// Loads entry content from an HTTP(S) URL
pub struct HttpLoader {
    client: Client,
    url: String,
    size: Option<u64>,
    max_retry: u32,
}

impl HttpLoader {
    /// Create a new HTTP loader
    ///
    /// This will send a HEAD request to verify the resource exists and learn its size
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let resp = client.head(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "HEAD {url} failed with status: {}",
                resp.status()
            )));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        Ok(Self {
            client,
            url,
            size,
            max_retry: 10,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ContentLoader for HttpLoader {
    async fn load(&self) -> Result<ChunkData> {
        let mut retry_count = 0;

        loop {
            match self.client.get(&self.url).send().await {
                Ok(resp) => {
                    if !resp.status().is_success() {
                        return Err(Error::Http(format!(
                            "GET {} failed with status: {}",
                            self.url,
                            resp.status()
                        )));
                    }
                    let bytes = resp.bytes().await?;
                    return Ok(ChunkData::Bytes(bytes.to_vec()));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(Error::Http(format!("max retries exceeded for {}", self.url)));
                    }
                    warn!(
                        "Connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn size_hint(&self) -> Option<u64> {
        self.size
    }
}
