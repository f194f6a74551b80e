use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Raw query parameters of a transform request, exactly as received.
///
/// Every field is an optional string so that absent and malformed values can
/// be reported by name instead of failing inside the extractor.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct ImageQuery {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub w: Option<String>,
    #[serde(default)]
    pub h: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl FromStr for ImageQuery {
    type Err = serde_urlencoded::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_urlencoded::from_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{}", missing_message(.0))]
    Missing(Vec<&'static str>),
    #[error("{name} must be {expected}")]
    Invalid { name: &'static str, expected: &'static str },
    #[error("malformed query string: {0}")]
    Malformed(String),
}

// "url is required" / "url and expires are required" / "url, expires, and signature are required"
fn missing_message(names: &[&'static str]) -> String {
    match names {
        [] => "missing required parameters".to_string(),
        [one] => format!("{} is required", one),
        [a, b] => format!("{} and {} are required", a, b),
        [rest @ .., last] => format!("{}, and {} are required", rest.join(", "), last),
    }
}

/// A validated transform request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    /// Epoch milliseconds after which the link is no longer valid.
    pub expires: i64,
    pub signature: String,
    /// The numeric parameters as sent. Signatures cover these, not the
    /// parsed values.
    pub raw: RawParams,
}

/// Non-empty `w`, `h`, `q` and `expires` values, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParams {
    pub width: Option<String>,
    pub height: Option<String>,
    pub quality: Option<String>,
    pub expires: String,
}

impl TranscodeRequest {
    /// Parse-and-validate step: all required parameters first, then the
    /// shape of each value. Nothing is coerced to a default.
    pub fn parse(query: &ImageQuery) -> Result<Self, ValidationError> {
        let url = present(&query.url);
        let expires = present(&query.expires);
        let signature = present(&query.signature);

        let missing: Vec<&'static str> = [("url", url), ("expires", expires), ("signature", signature)]
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| name)
            .collect();

        let (Some(url), Some(expires), Some(signature)) = (url, expires, signature) else {
            return Err(ValidationError::Missing(missing));
        };

        match reqwest::Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => return Err(ValidationError::Invalid { name: "url", expected: "an absolute http(s) URL" }),
        }

        let raw = RawParams {
            width: present(&query.w).map(str::to_string),
            height: present(&query.h).map(str::to_string),
            quality: present(&query.q).map(str::to_string),
            expires: expires.to_string(),
        };

        let expires = expires
            .parse::<i64>()
            .map_err(|_| ValidationError::Invalid { name: "expires", expected: "an integer timestamp in milliseconds" })?;

        let width = parse_dimension("w", &query.w)?;
        let height = parse_dimension("h", &query.h)?;
        let quality = match present(&query.q) {
            None => None,
            Some(q) => match q.parse::<u8>() {
                Ok(q) if (1..=100).contains(&q) => Some(q),
                _ => return Err(ValidationError::Invalid { name: "q", expected: "an integer between 1 and 100" }),
            },
        };

        Ok(Self {
            url: url.to_string(),
            width,
            height,
            quality,
            expires,
            signature: signature.to_string(),
            raw,
        })
    }
}

impl fmt::Display for TranscodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "url={} w={:?} h={:?} q={:?} expires={}",
            self.url, self.width, self.height, self.quality, self.expires
        )
    }
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

fn parse_dimension(name: &'static str, v: &Option<String>) -> Result<Option<u32>, ValidationError> {
    match present(v) {
        None => Ok(None),
        Some(s) => match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ValidationError::Invalid { name, expected: "a positive integer" }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(s: &str) -> ImageQuery {
        ImageQuery::from_str(s).unwrap()
    }

    #[test]
    fn all_required_missing() {
        let err = TranscodeRequest::parse(&ImageQuery::default()).unwrap_err();
        assert_eq!(err.to_string(), "url, expires, and signature are required");
    }

    #[test]
    fn names_only_the_missing_fields() {
        let err = TranscodeRequest::parse(&query("url=http://a/x.jpg&expires=")).unwrap_err();
        assert_eq!(err, ValidationError::Missing(vec!["expires", "signature"]));
        assert_eq!(err.to_string(), "expires and signature are required");

        let err = TranscodeRequest::parse(&query("url=http://a/x.jpg&expires=1")).unwrap_err();
        assert_eq!(err.to_string(), "signature is required");
    }

    #[test]
    fn parses_full_request() {
        let req = TranscodeRequest::parse(&query(
            "url=http%3A%2F%2Fhost%2Fphoto.png&w=0100&h=50&q=75&expires=1700000000000&signature=ab",
        ))
        .unwrap();
        assert_eq!(req.url, "http://host/photo.png");
        assert_eq!(req.width, Some(100));
        assert_eq!(req.height, Some(50));
        assert_eq!(req.quality, Some(75));
        assert_eq!(req.expires, 1_700_000_000_000);
        assert_eq!(req.raw.width.as_deref(), Some("0100"));
        assert_eq!(req.raw.expires, "1700000000000");
    }

    #[test]
    fn empty_optionals_are_absent() {
        let req = TranscodeRequest::parse(&query("url=http://a/x.jpg&w=&h=&q=&expires=5&signature=ab")).unwrap();
        assert_eq!((req.width, req.height, req.quality), (None, None, None));
        assert_eq!(req.raw, RawParams { expires: "5".into(), ..RawParams::default() });
    }

    #[test]
    fn rejects_non_numeric_width() {
        let err = TranscodeRequest::parse(&query("url=http://a/x.jpg&w=wide&expires=5&signature=ab")).unwrap_err();
        assert_eq!(err.to_string(), "w must be a positive integer");
    }

    #[test]
    fn rejects_zero_height_and_bad_quality() {
        let err = TranscodeRequest::parse(&query("url=http://a/x.jpg&h=0&expires=5&signature=ab")).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { name: "h", .. }));

        for q in ["0", "101", "-3", "high"] {
            let err = TranscodeRequest::parse(&query(&format!("url=http://a/x.jpg&q={}&expires=5&signature=ab", q)))
                .unwrap_err();
            assert!(matches!(err, ValidationError::Invalid { name: "q", .. }), "q={}", q);
        }
    }

    #[test]
    fn rejects_relative_url_and_bad_expiry() {
        let err = TranscodeRequest::parse(&query("url=/x.jpg&expires=5&signature=ab")).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { name: "url", .. }));

        let err = TranscodeRequest::parse(&query("url=http://a/x.jpg&expires=soon&signature=ab")).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { name: "expires", .. }));
    }
}
