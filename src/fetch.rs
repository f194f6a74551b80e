use crate::ProxyError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;

/// Source image as returned by the upstream server.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    /// Declared `Content-Type`, empty when the upstream sent none.
    pub content_type: String,
}

/// Retrieves source images. The transcoder only sees this trait so tests can
/// count and stub upstream calls.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ProxyError>;
}

/// Fetches over HTTP with a single GET and no retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_size: usize,
}

impl HttpFetcher {
    /// `timeout` of `None` keeps the client default.
    pub fn new(max_size: usize, timeout: Option<Duration>) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| ProxyError::InternalError(format!("HTTP client: {}", e)))?;
        Ok(Self { client, max_size })
    }
}

/// Fetches the source image into memory.
///
/// Checks performed, in order:
/// 1. HTTP status must be 2xx
/// 2. Content-Length, when present, must not exceed `max_size`
/// 3. The body is read in full with the same limit enforced on the bytes
///    actually received, so a lying Content-Length cannot get past it
///
/// The declared Content-Type is passed through untouched, whatever it is;
/// format dispatch happens in the transcoder.
///
/// # Errors
/// `ProxyError::NetworkError` on connection failures, non-2xx status or
/// oversized bodies.
#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, ProxyError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProxyError::NetworkError(format!(
                "Upstream status: {}",
                resp.status()
            )));
        }

        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Some(len) = resp.content_length() {
            if len > self.max_size as u64 {
                return Err(ProxyError::NetworkError(format!(
                    "Input exceeds size limit: {} > {}",
                    len, self.max_size
                )));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| ProxyError::NetworkError(e.to_string()))?
        {
            if buf.len() + chunk.len() > self.max_size {
                return Err(ProxyError::NetworkError(format!(
                    "Input exceeds size limit: {}",
                    self.max_size
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        tracing::debug!("Fetched {} bytes ({}) from {}", buf.len(), ct, url);

        Ok(FetchedImage { bytes: buf.freeze(), content_type: ct })
    }
}
