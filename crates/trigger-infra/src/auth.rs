//! Webhook authentication verification (spec §4.6).
//!
//! All header reads are case-insensitive; all secret comparisons are
//! constant-time. Ported and extended from the teacher's HMAC-SHA256 +
//! bearer-token webhook handler to cover all four `WebhookAuth` variants.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::{Sha256, Sha512};

use trigger_types::{HmacAlgorithm, WebhookAuth};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing required header: {0}")]
    MissingHeader(String),

    #[error("credentials did not match")]
    Mismatch,

    #[error("malformed hmac signature")]
    MalformedSignature,

    #[error("malformed basic auth header")]
    MalformedBasicAuth,

    #[error("invalid hmac key: {0}")]
    InvalidKey(String),
}

/// Case-insensitive header lookup. Webhook request headers are expected to
/// already be keyed by their original casing; this walks the map comparing
/// ASCII-case-insensitively rather than requiring callers to pre-lowercase.
pub fn header_lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Verify a request against a trigger's configured `WebhookAuth`. `body` is
/// the raw request body bytes (needed for HMAC); `headers` keys may be in
/// any case.
pub fn verify(auth: &WebhookAuth, headers: &HashMap<String, String>, body: &[u8]) -> Result<(), AuthError> {
    match auth {
        WebhookAuth::Bearer { secret } => verify_bearer(secret.expose_secret(), headers),
        WebhookAuth::Basic { secret } => verify_basic(secret.expose_secret(), headers),
        WebhookAuth::Hmac {
            secret,
            algorithm,
            header_name,
        } => verify_hmac(
            secret.expose_secret(),
            *algorithm,
            header_name.as_deref().unwrap_or("X-Signature"),
            headers,
            body,
        ),
        WebhookAuth::ApiKey { secret, header_name } => verify_api_key(
            secret.expose_secret(),
            header_name.as_deref().unwrap_or("X-API-Key"),
            headers,
        ),
    }
}

fn verify_bearer(secret: &str, headers: &HashMap<String, String>) -> Result<(), AuthError> {
    let header = header_lookup(headers, "Authorization")
        .ok_or_else(|| AuthError::MissingHeader("Authorization".to_string()))?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    if constant_time_eq(secret.as_bytes(), token.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

fn verify_basic(secret: &str, headers: &HashMap<String, String>) -> Result<(), AuthError> {
    let header = header_lookup(headers, "Authorization")
        .ok_or_else(|| AuthError::MissingHeader("Authorization".to_string()))?;
    let encoded = header.strip_prefix("Basic ").ok_or(AuthError::MalformedBasicAuth)?;

    use base64::Engine;
    let decoded_bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::MalformedBasicAuth)?;

    if constant_time_eq(secret.as_bytes(), &decoded_bytes) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

fn verify_hmac(
    secret: &str,
    algorithm: HmacAlgorithm,
    header_name: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<(), AuthError> {
    let header = header_lookup(headers, header_name)
        .ok_or_else(|| AuthError::MissingHeader(header_name.to_string()))?;
    let hex_sig = header
        .strip_prefix("sha256=")
        .or_else(|| header.strip_prefix("sha512="))
        .unwrap_or(header);
    let expected_bytes = hex_decode(hex_sig).map_err(|_| AuthError::MalformedSignature)?;

    match algorithm {
        HmacAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
            mac.update(body);
            mac.verify_slice(&expected_bytes).map_err(|_| AuthError::Mismatch)
        }
        HmacAlgorithm::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
                .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
            mac.update(body);
            mac.verify_slice(&expected_bytes).map_err(|_| AuthError::Mismatch)
        }
    }
}

fn verify_api_key(secret: &str, header_name: &str, headers: &HashMap<String, String>) -> Result<(), AuthError> {
    let header = header_lookup(headers, header_name)
        .ok_or_else(|| AuthError::MissingHeader(header_name.to_string()))?;
    if constant_time_eq(secret.as_bytes(), header.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Compute a hex-encoded HMAC, for constructing test vectors and signing
/// outbound test requests.
pub fn compute_hmac_hex(secret: &[u8], algorithm: HmacAlgorithm, body: &[u8]) -> String {
    match algorithm {
        HmacAlgorithm::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
            mac.update(body);
            hex_encode(&mac.finalize().into_bytes())
        }
        HmacAlgorithm::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(secret).expect("hmac accepts any key length");
            mac.update(body);
            hex_encode(&mac.finalize().into_bytes())
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_bearer_success() {
        let auth = WebhookAuth::Bearer {
            secret: SecretString::from("s3cret"),
        };
        let h = headers(&[("Authorization", "Bearer s3cret")]);
        assert!(verify(&auth, &h, b"").is_ok());
    }

    #[test]
    fn test_bearer_wrong_token() {
        let auth = WebhookAuth::Bearer {
            secret: SecretString::from("s3cret"),
        };
        let h = headers(&[("Authorization", "Bearer wrong")]);
        assert_eq!(verify(&auth, &h, b""), Err(AuthError::Mismatch));
    }

    #[test]
    fn test_bearer_missing_header() {
        let auth = WebhookAuth::Bearer {
            secret: SecretString::from("s3cret"),
        };
        let h = headers(&[]);
        assert!(matches!(verify(&auth, &h, b""), Err(AuthError::MissingHeader(_))));
    }

    #[test]
    fn test_bearer_header_lookup_is_case_insensitive() {
        let auth = WebhookAuth::Bearer {
            secret: SecretString::from("s3cret"),
        };
        let h = headers(&[("authorization", "Bearer s3cret")]);
        assert!(verify(&auth, &h, b"").is_ok());
    }

    #[test]
    fn test_basic_success() {
        use base64::Engine;
        let auth = WebhookAuth::Basic {
            secret: SecretString::from("user:pass"),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode("user:pass");
        let h = headers(&[("Authorization", &format!("Basic {encoded}"))]);
        assert!(verify(&auth, &h, b"").is_ok());
    }

    #[test]
    fn test_basic_wrong_credentials() {
        use base64::Engine;
        let auth = WebhookAuth::Basic {
            secret: SecretString::from("user:pass"),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode("user:wrong");
        let h = headers(&[("Authorization", &format!("Basic {encoded}"))]);
        assert_eq!(verify(&auth, &h, b""), Err(AuthError::Mismatch));
    }

    #[test]
    fn test_hmac_success_default_header() {
        let auth = WebhookAuth::Hmac {
            secret: SecretString::from("k"),
            algorithm: HmacAlgorithm::Sha256,
            header_name: None,
        };
        let body = b"{\"y\":2}";
        let sig = compute_hmac_hex(b"k", HmacAlgorithm::Sha256, body);
        let h = headers(&[("X-Signature", &format!("sha256={sig}"))]);
        assert!(verify(&auth, &h, body).is_ok());
    }

    #[test]
    fn test_hmac_failure_wrong_signature() {
        // Scenario 3 from the end-to-end property list: wrong signature -> Mismatch.
        let auth = WebhookAuth::Hmac {
            secret: SecretString::from("k"),
            algorithm: HmacAlgorithm::Sha256,
            header_name: None,
        };
        let body = b"{\"y\":2}";
        let h = headers(&[(
            "X-Signature",
            "sha256=0000000000000000000000000000000000000000000000000000000000000000",
        )]);
        assert_eq!(verify(&auth, &h, body), Err(AuthError::Mismatch));
    }

    #[test]
    fn test_hmac_sha512_algorithm_selected() {
        let auth = WebhookAuth::Hmac {
            secret: SecretString::from("k"),
            algorithm: HmacAlgorithm::Sha512,
            header_name: None,
        };
        let body = b"payload";
        let sig = compute_hmac_hex(b"k", HmacAlgorithm::Sha512, body);
        let h = headers(&[("X-Signature", &sig)]);
        assert!(verify(&auth, &h, body).is_ok());
    }

    #[test]
    fn test_hmac_custom_header_name() {
        let auth = WebhookAuth::Hmac {
            secret: SecretString::from("k"),
            algorithm: HmacAlgorithm::Sha256,
            header_name: Some("X-Hub-Signature-256".to_string()),
        };
        let body = b"payload";
        let sig = compute_hmac_hex(b"k", HmacAlgorithm::Sha256, body);
        let h = headers(&[("X-Hub-Signature-256", &format!("sha256={sig}"))]);
        assert!(verify(&auth, &h, body).is_ok());
    }

    #[test]
    fn test_api_key_success() {
        let auth = WebhookAuth::ApiKey {
            secret: SecretString::from("abc123"),
            header_name: None,
        };
        let h = headers(&[("X-API-Key", "abc123")]);
        assert!(verify(&auth, &h, b"").is_ok());
    }

    #[test]
    fn test_api_key_custom_header() {
        let auth = WebhookAuth::ApiKey {
            secret: SecretString::from("abc123"),
            header_name: Some("X-Custom-Key".to_string()),
        };
        let h = headers(&[("X-Custom-Key", "abc123")]);
        assert!(verify(&auth, &h, b"").is_ok());
    }

    // RFC 4231 test vector 1.
    #[test]
    fn test_hmac_sha256_rfc4231_vector1() {
        let key = vec![0x0b_u8; 20];
        let data = b"Hi There";
        let expected = "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7";
        assert_eq!(compute_hmac_hex(&key, HmacAlgorithm::Sha256, data), expected);
    }

    // RFC 4231 test vector 2.
    #[test]
    fn test_hmac_sha256_rfc4231_vector2() {
        let key = b"Jefe";
        let data = b"what do ya want for nothing?";
        let expected = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";
        assert_eq!(compute_hmac_hex(key, HmacAlgorithm::Sha256, data), expected);
    }

    #[test]
    fn test_hex_decode_rejects_odd_length() {
        assert!(hex_decode("0").is_err());
    }
}
