use hmac::Mac;
use pixproxy::signature::{
    canonical_string, compute_signature, sign_params, verify_signature, SignatureError, SignedParams,
};

const SECRET: &str = "s";
const FAR_FUTURE: i64 = 4_102_444_800_000; // 2100-01-01
const FAR_FUTURE_STR: &str = "4102444800000";

fn params(url: &str) -> SignedParams<'_> {
    SignedParams {
        url,
        width: Some("400"),
        height: None,
        quality: Some("75"),
        expires: FAR_FUTURE_STR,
        expires_at: FAR_FUTURE,
    }
}

fn hmac_hex(message: &str) -> String {
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[test]
fn signature_validates() {
    let p = params("https://example.com/a.jpg");
    // compute expected independently
    let sig = hmac_hex(&format!("https://example.com/a.jpg40075{}", FAR_FUTURE));

    assert_eq!(compute_signature(&p, SECRET).unwrap(), sig);
    assert!(verify_signature(&p, &sig, Some(SECRET), 0).is_ok());
}

#[test]
fn canonical_string_skips_absent_values() {
    let p = SignedParams {
        url: "http://a/x",
        width: None,
        height: Some("10"),
        quality: None,
        expires: "5",
        expires_at: 5,
    };
    assert_eq!(canonical_string(&p), "http://a/x105");
}

#[test]
fn signs_numbers_as_written() {
    let padded = SignedParams { width: Some("0400"), quality: Some("075"), ..params("https://example.com/a.jpg") };
    let sig = hmac_hex(&format!("https://example.com/a.jpg0400075{}", FAR_FUTURE));
    assert!(verify_signature(&padded, &sig, Some(SECRET), 0).is_ok());

    // same numbers, different spelling: a different link
    let plain = params("https://example.com/a.jpg");
    assert_eq!(verify_signature(&plain, &sig, Some(SECRET), 0), Err(SignatureError::Invalid));
}

#[test]
fn signature_rejects_tamper() {
    let p = params("https://example.com/a.jpg");
    let sig = compute_signature(&p, SECRET).unwrap();

    for i in 0..sig.len() {
        let mut bytes = sig.clone().into_bytes();
        bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(
            verify_signature(&p, &tampered, Some(SECRET), 0),
            Err(SignatureError::Invalid),
            "flipped position {}",
            i
        );
    }
}

#[test]
fn signature_rejects_changed_parameters() {
    let p = params("https://example.com/a.jpg");
    let sig = compute_signature(&p, SECRET).unwrap();

    let wider = SignedParams { width: Some("401"), ..p };
    let other_url = params("https://example.com/b.jpg");
    let later = SignedParams { expires: "4102444800001", expires_at: FAR_FUTURE + 1, ..p };

    for changed in [wider, other_url, later] {
        assert_eq!(verify_signature(&changed, &sig, Some(SECRET), 0), Err(SignatureError::Invalid));
    }
    assert_eq!(verify_signature(&p, &sig, Some("other"), 0), Err(SignatureError::Invalid));
}

#[test]
fn uppercase_hex_is_rejected() {
    let p = params("https://example.com/a.jpg");
    let sig = compute_signature(&p, SECRET).unwrap().to_uppercase();
    assert_eq!(verify_signature(&p, &sig, Some(SECRET), 0), Err(SignatureError::Invalid));
}

#[test]
fn expiry_checked_before_signature() {
    let p = SignedParams { expires: "1000", expires_at: 1_000, ..params("https://example.com/a.jpg") };
    assert_eq!(
        verify_signature(&p, "garbage", Some(SECRET), 1_001),
        Err(SignatureError::Expired { expires_at: 1_000, now: 1_001 })
    );

    // the boundary instant itself is still valid
    let sig = compute_signature(&p, SECRET).unwrap();
    assert!(verify_signature(&p, &sig, Some(SECRET), 1_000).is_ok());
}

#[test]
fn missing_secret_refuses_everything() {
    let p = params("https://example.com/a.jpg");
    assert_eq!(verify_signature(&p, "ab", None, 0), Err(SignatureError::MissingSecret));
    assert_eq!(verify_signature(&p, "ab", Some(""), 0), Err(SignatureError::MissingSecret));
    assert_eq!(compute_signature(&p, ""), Err(SignatureError::MissingSecret));
}

#[test]
fn signed_query_round_trips_through_parser() {
    use pixproxy::transform::params::{ImageQuery, TranscodeRequest};

    let signed = sign_params("https://example.com/a b.jpg?x=1&y=2", Some(64), None, None, FAR_FUTURE, SECRET)
        .unwrap();
    let query: ImageQuery = signed.to_query_string().parse().unwrap();
    let req = TranscodeRequest::parse(&query).unwrap();

    assert_eq!(req.url, "https://example.com/a b.jpg?x=1&y=2");
    assert_eq!(req.width, Some(64));
    assert!(verify_signature(&SignedParams::from(&req), &req.signature, Some(SECRET), 0).is_ok());
}
