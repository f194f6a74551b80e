use sha2::{Digest, Sha256};

/// Placeholder written for an absent width, height or quality.
pub const AUTO: &str = "auto";

/// Cache key for a transform: `{w}:{h}:{q}:{url}`.
///
/// Absent values become [`AUTO`]. The three numeric slots can only hold
/// digits or `auto`, so the first three `:` always delimit them and the URL
/// is whatever follows. That makes the mapping injective without hashing.
pub fn derive_key(url: &str, width: Option<u32>, height: Option<u32>, quality: Option<u8>) -> String {
    fn slot<T: ToString>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_else(|| AUTO.to_string())
    }
    format!("{}:{}:{}:{}", slot(width), slot(height), slot(quality), url)
}

/// Strong ETag for a cache key. The key itself can contain characters that
/// are not valid in a header, so it is hashed.
pub fn etag_for_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("\"{}\"", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_use_placeholder() {
        assert_eq!(derive_key("http://a/x.jpg", None, None, None), "auto:auto:auto:http://a/x.jpg");
        assert_eq!(derive_key("http://a/x.jpg", Some(100), None, Some(75)), "100:auto:75:http://a/x.jpg");
    }

    #[test]
    fn width_and_height_are_not_interchangeable() {
        assert_ne!(
            derive_key("http://a/x.jpg", Some(100), None, None),
            derive_key("http://a/x.jpg", None, Some(100), None)
        );
    }

    #[test]
    fn url_with_colons_stays_unambiguous() {
        let a = derive_key("http://a/1:2", Some(3), None, None);
        let b = derive_key("2:http://a/1", Some(3), None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn etag_is_quoted_hex() {
        let etag = etag_for_key("auto:auto:auto:http://a/x.jpg");
        assert_eq!(etag.len(), 34);
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag, etag_for_key("auto:auto:auto:http://a/x.jpg"));
    }
}
