#![allow(dead_code)]

use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageEncoder, RgbImage};
use pixproxy::cache::{CacheStore, MemoryCache};
use pixproxy::config::ProxyConfig;
use pixproxy::fetch::{FetchedImage, Fetcher};
use pixproxy::{router, AppState, ProxyError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SECRET: &str = "test-secret-key";

/// Upstream stand-in that serves one fixed body and counts calls.
pub struct StubFetcher {
    calls: AtomicUsize,
    body: Bytes,
    content_type: String,
    delay: Option<Duration>,
    fail: bool,
}

impl StubFetcher {
    pub fn new(body: Vec<u8>, content_type: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            body: Bytes::from(body),
            content_type: content_type.to_string(),
            delay: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new(Vec::new(), "") }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedImage, ProxyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(ProxyError::NetworkError("Upstream status: 502 Bad Gateway".into()));
        }
        Ok(FetchedImage { bytes: self.body.clone(), content_type: self.content_type.clone() })
    }
}

/// A gradient so the encoders have something non-trivial to compress.
pub fn sample_image(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x ^ y) % 256) as u8])
    }))
}

/// PNG written with the fast encoder, so a re-encode cannot reproduce it.
pub fn sample_png(w: u32, h: u32) -> Vec<u8> {
    let img = sample_image(w, h).to_rgb8();
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
        .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

pub fn sample_jpeg(w: u32, h: u32) -> Vec<u8> {
    let mut out = Vec::new();
    sample_image(w, h)
        .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    out
}

pub fn test_config(secret: Option<&str>) -> ProxyConfig {
    ProxyConfig {
        secret: secret.map(str::to_string),
        rate_limit: None,
        ..ProxyConfig::default()
    }
}

pub fn state_with(fetcher: Arc<dyn Fetcher>, cache: CacheStore, secret: Option<&str>) -> AppState {
    AppState::new(test_config(secret), cache, fetcher)
}

pub fn app(fetcher: Arc<StubFetcher>) -> axum::Router {
    let cache = CacheStore::new(Arc::new(MemoryCache::with_capacity(16 * 1024 * 1024)));
    router(state_with(fetcher, cache, Some(SECRET)))
}

/// Signed `/api?...` URI valid for another minute.
pub fn signed_uri(url: &str, w: Option<u32>, h: Option<u32>, q: Option<u8>) -> String {
    signed_uri_expiring(url, w, h, q, pixproxy::signature::now_millis() + 60_000)
}

pub fn signed_uri_expiring(url: &str, w: Option<u32>, h: Option<u32>, q: Option<u8>, expires: i64) -> String {
    let signed = pixproxy::signature::sign_params(url, w, h, q, expires, SECRET).unwrap();
    format!("/api?{}", signed.to_query_string())
}
