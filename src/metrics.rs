use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
    /// Backend failures the cache store absorbed
    pub cache_errors: AtomicU64,
    /// Requests that waited on another request's transcode
    pub coalesced: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_errors: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 6] = [
            ("pixproxy_cache_hits_total", "Total number of cache hits", &self.cache_hits),
            ("pixproxy_cache_misses_total", "Total number of cache misses", &self.cache_misses),
            ("pixproxy_transforms_total", "Total number of image transcodes", &self.transforms),
            ("pixproxy_errors_total", "Total number of failed requests", &self.errors),
            ("pixproxy_cache_errors_total", "Total number of cache backend failures", &self.cache_errors),
            ("pixproxy_coalesced_total", "Total number of requests coalesced onto an in-flight transcode", &self.coalesced),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}
