use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::transform::params::TranscodeRequest;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signing secret is not configured")]
    MissingSecret,
    #[error("URL has expired")]
    Expired { expires_at: i64, now: i64 },
    #[error("Invalid signature")]
    Invalid,
}

/// The parameters a signature covers, borrowed from a request.
///
/// `width`, `height`, `quality` and `expires` are the query values exactly
/// as sent, so `w=0100` is signed as `0100`. `expires_at` is the parsed
/// form of `expires` and only drives the expiry check.
#[derive(Debug, Clone, Copy)]
pub struct SignedParams<'a> {
    pub url: &'a str,
    pub width: Option<&'a str>,
    pub height: Option<&'a str>,
    pub quality: Option<&'a str>,
    pub expires: &'a str,
    pub expires_at: i64,
}

impl<'a> From<&'a TranscodeRequest> for SignedParams<'a> {
    fn from(req: &'a TranscodeRequest) -> Self {
        Self {
            url: &req.url,
            width: req.raw.width.as_deref(),
            height: req.raw.height.as_deref(),
            quality: req.raw.quality.as_deref(),
            expires: &req.raw.expires,
            expires_at: req.expires,
        }
    }
}

// url, w, h, q, expires concatenated with no separators; absent values are empty
pub fn canonical_string(params: &SignedParams<'_>) -> String {
    format!(
        "{}{}{}{}{}",
        params.url,
        params.width.unwrap_or_default(),
        params.height.unwrap_or_default(),
        params.quality.unwrap_or_default(),
        params.expires
    )
}

/// Lowercase hex HMAC-SHA256 of the canonical string.
pub fn compute_signature(params: &SignedParams<'_>, secret: &str) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::MissingSecret)?;
    mac.update(canonical_string(params).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks expiry first, then the signature.
///
/// An expired link is rejected without computing the HMAC. The signature
/// comparison is constant-time over the hex strings.
pub fn verify_signature(
    params: &SignedParams<'_>,
    sig: &str,
    secret: Option<&str>,
    now_millis: i64,
) -> Result<(), SignatureError> {
    let secret = match secret {
        Some(s) if !s.is_empty() => s,
        _ => return Err(SignatureError::MissingSecret),
    };

    if now_millis > params.expires_at {
        return Err(SignatureError::Expired { expires_at: params.expires_at, now: now_millis });
    }

    let expected = compute_signature(params, secret)?;
    if expected.as_bytes().ct_eq(sig.as_bytes()).into() {
        Ok(())
    } else {
        Err(SignatureError::Invalid)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Query string for a signed transform link.
#[derive(Debug, Serialize)]
pub struct SignedQuery {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<u8>,
    pub expires: i64,
    pub signature: String,
}

impl SignedQuery {
    /// Percent-encoded `url=..&w=..&expires=..&signature=..`.
    pub fn to_query_string(&self) -> String {
        // only fails for non-string map keys, which this struct never has
        serde_urlencoded::to_string(self).unwrap_or_default()
    }
}

/// Signs a link that stays valid until `expires` (epoch milliseconds).
///
/// Uses the same canonical string as [`verify_signature`], so anything this
/// produces verifies against the same secret until it expires.
pub fn sign_params(
    url: &str,
    width: Option<u32>,
    height: Option<u32>,
    quality: Option<u8>,
    expires: i64,
    secret: &str,
) -> Result<SignedQuery, SignatureError> {
    let w = width.map(|v| v.to_string());
    let h = height.map(|v| v.to_string());
    let q = quality.map(|v| v.to_string());
    let expires_raw = expires.to_string();
    let params = SignedParams {
        url,
        width: w.as_deref(),
        height: h.as_deref(),
        quality: q.as_deref(),
        expires: &expires_raw,
        expires_at: expires,
    };
    let signature = compute_signature(&params, secret)?;
    Ok(SignedQuery {
        url: url.to_string(),
        w: width,
        h: height,
        q: quality,
        expires,
        signature,
    })
}
