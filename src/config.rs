use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::cache::control::CacheControl;

/// Quality applied when the request carries no `q`, for every output format.
pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BASE_PATH: &str = "/api";
pub const DEFAULT_MAX_INPUT_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 256 * 1024 * 1024;

/// Which backend the cache store is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Sled,
}

impl std::fmt::Display for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackend::Memory => write!(f, "memory"),
            CacheBackend::Sled => write!(f, "sled"),
        }
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "sled" => Ok(CacheBackend::Sled),
            other => Err(ConfigError::InvalidValue {
                name: "CACHE_BACKEND",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-IP token bucket applied to the transform route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst_size: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { per_second: 10, burst_size: 30 }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// HMAC key shared with whoever issues signed URLs. `None` keeps the
    /// server up but every transform request fails as a configuration fault.
    pub secret: Option<String>,
    pub port: u16,
    /// Mount point of the transform endpoint, e.g. `/api`.
    pub base_path: String,
    pub cache_backend: CacheBackend,
    pub cache_dir: PathBuf,
    pub max_cache_size: u64,   // bytes
    pub max_input_size: usize, // bytes
    pub max_concurrent_transcodes: usize,
    pub upstream_timeout: Option<Duration>,
    pub rate_limit: Option<RateLimit>,
    pub cache_control: CacheControl,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            secret: None,
            port: DEFAULT_PORT,
            base_path: DEFAULT_BASE_PATH.to_string(),
            cache_backend: CacheBackend::Memory,
            cache_dir: PathBuf::from("./cache"),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
            max_concurrent_transcodes: default_concurrency(),
            upstream_timeout: None,
            rate_limit: Some(RateLimit::default()),
            cache_control: CacheControl::for_images(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Secret cannot be empty")] EmptySecret,
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Max cache size must be > 0")] InvalidMaxCache,
    #[error("Max concurrent transcodes must be > 0")] InvalidConcurrency,
    #[error("Base path must start with '/': {0}")] InvalidBasePath(String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl ProxyConfig {
    /// Builds a config from the process environment, starting from defaults.
    ///
    /// Unset variables keep their default. A variable that is set but does
    /// not parse is an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ProxyConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        cfg.secret = lookup("SIGNED_URL_SECRET");
        if let Some(port) = lookup("PORT") {
            cfg.port = parse_var("PORT", &port)?;
        }
        if let Some(base) = lookup("BASE_PATH") {
            cfg.base_path = base;
        }
        if let Some(backend) = lookup("CACHE_BACKEND") {
            cfg.cache_backend = backend.parse()?;
        }
        if let Some(dir) = lookup("CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(dir);
        }
        if let Some(size) = lookup("CACHE_MAX_BYTES") {
            cfg.max_cache_size = parse_var("CACHE_MAX_BYTES", &size)?;
        }
        if let Some(size) = lookup("MAX_INPUT_SIZE") {
            cfg.max_input_size = parse_var("MAX_INPUT_SIZE", &size)?;
        }
        if let Some(n) = lookup("MAX_CONCURRENT_TRANSCODES") {
            cfg.max_concurrent_transcodes = parse_var("MAX_CONCURRENT_TRANSCODES", &n)?;
        }
        if let Some(secs) = lookup("UPSTREAM_TIMEOUT_SECS") {
            cfg.upstream_timeout = Some(Duration::from_secs(parse_var("UPSTREAM_TIMEOUT_SECS", &secs)?));
        }
        if lookup("DISABLE_RATE_LIMIT").is_some() {
            cfg.rate_limit = None;
        }
        if let Some(secs) = lookup("CACHE_MAX_AGE_SECS") {
            cfg.cache_control.browser_max_age = parse_var("CACHE_MAX_AGE_SECS", &secs)?;
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.secret {
            Some(s) if !s.trim().is_empty() => {}
            _ => return Err(ConfigError::EmptySecret),
        }
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        if self.max_cache_size == 0 { return Err(ConfigError::InvalidMaxCache); }
        if self.max_concurrent_transcodes == 0 { return Err(ConfigError::InvalidConcurrency); }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::InvalidBasePath(self.base_path.clone()));
        }
        Ok(())
    }

    /// The configured secret, treating a blank value as absent.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|s| !s.trim().is_empty())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = ProxyConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.base_path, "/api");
        assert_eq!(cfg.cache_backend, CacheBackend::Memory);
        assert!(cfg.secret.is_none());
        assert!(cfg.rate_limit.is_some());
    }

    #[test]
    fn env_overrides_are_parsed() {
        let cfg = ProxyConfig::from_lookup(lookup_from(&[
            ("SIGNED_URL_SECRET", "s3cret"),
            ("PORT", "8080"),
            ("CACHE_BACKEND", "sled"),
            ("CACHE_MAX_BYTES", "1024"),
            ("UPSTREAM_TIMEOUT_SECS", "5"),
            ("DISABLE_RATE_LIMIT", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.signing_secret(), Some("s3cret"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.cache_backend, CacheBackend::Sled);
        assert_eq!(cfg.max_cache_size, 1024);
        assert_eq!(cfg.upstream_timeout, Some(Duration::from_secs(5)));
        assert!(cfg.rate_limit.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = ProxyConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "PORT", .. }));
    }

    #[test]
    fn validate_requires_secret() {
        let mut cfg = ProxyConfig::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptySecret)));
        cfg.secret = Some("   ".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptySecret)));
        assert_eq!(cfg.signing_secret(), None);
        cfg.secret = Some("k".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_relative_base_path() {
        let cfg = ProxyConfig {
            secret: Some("k".into()),
            base_path: "api".into(),
            ..ProxyConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBasePath(_))));
    }
}
