/// HTTP caching directives attached to successful image responses.
///
/// Browser and CDN lifetimes are set separately (`max-age` vs `s-maxage`
/// and `CDN-Cache-Control`). Both are capped by how long the signed link
/// remains valid, so a downstream cache never serves a response past the
/// link's own expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheControl {
    /// Browser cache time-to-live in seconds (max-age).
    pub browser_max_age: u32,

    /// CDN cache time-to-live in seconds (s-maxage).
    pub edge_max_age: u32,

    pub public: bool,

    /// Transcoding is deterministic for a given parameter set.
    pub immutable: bool,

    /// stale-if-error, in seconds.
    pub stale_if_error: Option<u32>,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            browser_max_age: 31536000, // 1 year
            edge_max_age: 86400,       // 1 day
            public: true,
            immutable: true,
            stale_if_error: Some(86400),
        }
    }
}

impl CacheControl {
    pub fn for_images() -> Self {
        Self::default()
    }

    /// `Cache-Control` value for a link that stays valid for another
    /// `remaining_secs` seconds.
    pub fn cache_control_value(&self, remaining_secs: u64) -> String {
        let browser = cap(self.browser_max_age, remaining_secs);
        let edge = cap(self.edge_max_age, remaining_secs);
        if browser == 0 && edge == 0 {
            return "no-store, no-cache, must-revalidate".to_string();
        }

        let mut parts = vec![
            if self.public { "public" } else { "private" }.to_string(),
            format!("max-age={}", browser),
            format!("s-maxage={}", edge),
        ];
        if self.immutable {
            parts.push("immutable".to_string());
        }
        if let Some(seconds) = self.stale_if_error {
            parts.push(format!("stale-if-error={}", seconds));
        }
        parts.join(", ")
    }

    /// `CDN-Cache-Control` value, same capping as above.
    pub fn cdn_cache_control_value(&self, remaining_secs: u64) -> String {
        match cap(self.edge_max_age, remaining_secs) {
            0 => "no-store".to_string(),
            edge => format!("max-age={}", edge),
        }
    }
}

fn cap(max_age: u32, remaining_secs: u64) -> u64 {
    (max_age as u64).min(remaining_secs)
}
