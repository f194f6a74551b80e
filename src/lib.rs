use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod fetch;
pub mod metrics;
pub mod signature;
pub mod transform;

use crate::cache::{derive_key, etag_for_key, CacheEntry, CacheStore};
use crate::coalesce::Coalescer;
use crate::config::ProxyConfig;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::metrics::METRICS;
use crate::signature::{now_millis, verify_signature, SignatureError, SignedParams};
use crate::transform::params::{ImageQuery, TranscodeRequest, ValidationError};
use crate::transform::Transcoder;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidArgument(#[from] ValidationError),
    #[error("URL has expired")]
    Expired,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Decode error: {0}")]
    DecodeError(String),
    #[error("Encode error: {0}")]
    EncodeError(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<SignatureError> for ProxyError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::MissingSecret => {
                ProxyError::ConfigurationError("SIGNED_URL_SECRET is not set".into())
            }
            SignatureError::Expired { .. } => ProxyError::Expired,
            SignatureError::Invalid => ProxyError::InvalidSignature,
        }
    }
}

/// Every error leaves as `{ "error": message }`. Server-side faults get a
/// fixed message; their detail only goes to the log.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProxyError::InvalidArgument(e) => {
                tracing::debug!("Rejected request: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ProxyError::Expired => {
                tracing::debug!("Rejected request: {}", self);
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ProxyError::InvalidSignature => {
                tracing::warn!("Rejected request: {}", self);
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ProxyError::ConfigurationError(detail) => {
                tracing::error!("Refusing request, server misconfigured: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ProxyError::NetworkError(_)
            | ProxyError::DecodeError(_)
            | ProxyError::EncodeError(_)
            | ProxyError::InternalError(_) => {
                tracing::error!("Failed to process image: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process image".to_string())
            }
        };

        METRICS.errors.fetch_add(1, Ordering::Relaxed);
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Everything a request needs, built once at startup and shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub cache: CacheStore,
    pub transcoder: Transcoder,
    pub coalescer: Coalescer,
}

impl AppState {
    pub fn new(config: ProxyConfig, cache: CacheStore, fetcher: Arc<dyn Fetcher>) -> Self {
        let transcoder = Transcoder::new(fetcher, config.max_concurrent_transcodes);
        Self {
            config: Arc::new(config),
            cache,
            transcoder,
            coalescer: Coalescer::new(),
        }
    }

    /// Production wiring: HTTP fetcher plus the configured cache backend.
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        let cache = CacheStore::from_config(&config).map_err(ProxyError::InternalError)?;
        let fetcher = HttpFetcher::new(config.max_input_size, config.upstream_timeout)?;
        Ok(Self::new(config, cache, Arc::new(fetcher)))
    }
}

#[derive(Debug, Clone, Copy)]
enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

async fn handler(State(state): State<AppState>, RawQuery(raw): RawQuery) -> Result<Response> {
    let query = raw
        .unwrap_or_default()
        .parse::<ImageQuery>()
        .map_err(|e: serde_urlencoded::de::Error| ValidationError::Malformed(e.to_string()))?;
    serve(&state, &query).await
}

/// parse -> secret -> expiry -> signature -> cache -> transcode -> store
pub async fn serve(state: &AppState, query: &ImageQuery) -> Result<Response> {
    let req = TranscodeRequest::parse(query)?;
    tracing::debug!("Processing image request: {}", req);

    let now = now_millis();
    verify_signature(&SignedParams::from(&req), &req.signature, state.config.signing_secret(), now)?;

    let key = derive_key(&req.url, req.width, req.height, req.quality);

    if let Some(entry) = state.cache.get(&key).await {
        tracing::info!("Cache hit for key={}", key);
        METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok(image_response(&state.config, &key, entry, req.expires, now, CacheStatus::Hit));
    }

    // a transcode for this key may have finished between the miss and here
    let slot = state.coalescer.acquire(&key).await;
    if !slot.is_leader() {
        METRICS.coalesced.fetch_add(1, Ordering::Relaxed);
    }
    if let Some(entry) = state.cache.get(&key).await {
        tracing::debug!("Served key={} from a concurrent transcode", key);
        METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok(image_response(&state.config, &key, entry, req.expires, now, CacheStatus::Hit));
    }

    tracing::info!("Cache miss for key={}, fetching from {}", key, req.url);
    METRICS.cache_misses.fetch_add(1, Ordering::Relaxed);
    METRICS.transforms.fetch_add(1, Ordering::Relaxed);
    let out = state
        .transcoder
        .transcode(&req.url, req.width, req.height, req.quality)
        .await?;

    let entry = CacheEntry {
        content_type: out.content_type().to_string(),
        bytes: out.bytes,
    };
    state.cache.put(&key, entry.clone()).await;
    drop(slot);

    Ok(image_response(&state.config, &key, entry, req.expires, now, CacheStatus::Miss))
}

fn image_response(
    config: &ProxyConfig,
    key: &str,
    entry: CacheEntry,
    expires: i64,
    now: i64,
    status: CacheStatus,
) -> Response {
    let remaining_secs = (expires.saturating_sub(now).max(0) / 1000) as u64;

    let mut headers = HeaderMap::new();
    if let Ok(ct) = HeaderValue::from_str(&entry.content_type) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    if let Ok(v) = HeaderValue::from_str(&config.cache_control.cache_control_value(remaining_secs)) {
        headers.insert(header::CACHE_CONTROL, v);
    }
    if let Ok(v) = HeaderValue::from_str(&config.cache_control.cdn_cache_control_value(remaining_secs)) {
        headers.insert(HeaderName::from_static("cdn-cache-control"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&etag_for_key(key)) {
        headers.insert(header::ETAG, v);
    }
    headers.insert(HeaderName::from_static("x-cache"), HeaderValue::from_static(status.as_str()));

    (StatusCode::OK, headers, Body::from(entry.bytes)).into_response()
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "pixproxy"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats().await;
    let hits = METRICS.cache_hits.load(Ordering::Relaxed);
    let misses = METRICS.cache_misses.load(Ordering::Relaxed);
    let total = hits + misses;
    let hit_rate = if total > 0 { (hits as f64 / total as f64) * 100.0 } else { 0.0 };

    Json(json!({
        "cache": stats,
        "requests": {
            "cache_hits": hits,
            "cache_misses": misses,
            "total": total,
            "hit_rate_percent": hit_rate,
        },
        "transforms": {
            "total": METRICS.transforms.load(Ordering::Relaxed),
            "coalesced": METRICS.coalesced.load(Ordering::Relaxed),
            "errors": METRICS.errors.load(Ordering::Relaxed),
        }
    }))
}

/// Builds the application router.
///
/// The transform endpoint is mounted at `config.base_path` (both with and
/// without a trailing slash) and is rate limited when configured.
/// `/health`, `/metrics` and `/stats/cache` are never rate limited.
pub fn router(state: AppState) -> Router {
    let base = state.config.base_path.trim_end_matches('/').to_string();

    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats/cache", get(cache_stats_handler));

    let mut transform_routes = Router::new().route(&format!("{}/", base), get(handler));
    if !base.is_empty() {
        transform_routes = transform_routes.route(&base, get(handler));
    }

    match state.config.rate_limit {
        Some(limit) => {
            let governor_conf = GovernorConfigBuilder::default()
                .per_second(limit.per_second)
                .burst_size(limit.burst_size)
                .finish();
            match governor_conf {
                Some(conf) => {
                    tracing::info!(
                        "Router configured with rate limiting: {}/sec, burst {}",
                        limit.per_second, limit.burst_size
                    );
                    transform_routes = transform_routes.layer(GovernorLayer {
                        config: Box::leak(Box::new(conf)),
                    });
                }
                None => tracing::warn!("Invalid rate limit {:?}, rate limiting disabled", limit),
            }
        }
        None => tracing::info!("Rate limiting disabled"),
    }

    Router::new()
        .merge(observability_routes)
        .merge(transform_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
