//! Unverified JWT payload decoding.
//!
//! The client only reads the `exp` claim to schedule renewals. No signature is
//! checked here, so nothing decoded by this module may be used to establish trust.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// URL-safe alphabet that accepts payload segments with or without padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Claim set read from a token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    inner: Map<String, Value>,
}

impl Claims {
    /// Expiry as seconds since the epoch, if the payload carries a numeric `exp`.
    pub fn exp(&self) -> Option<i64> {
        match self.inner.get("exp")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp()?, 0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }
}

/// Decodes the payload segment of a compact JWT.
///
/// Returns `None` for a wrong segment count, bad base64 or a payload that is
/// not a JSON object. Callers treat `None` the same as an expired token.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let bytes = PAYLOAD_ENGINE.decode(payload).ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(inner) => Some(Claims { inner }),
        _ => None,
    }
}

/// True when `token` is expired at `now`, or carries no usable expiry.
pub fn is_token_expired(token: &str, now: DateTime<Utc>) -> bool {
    match decode_claims(token).and_then(|claims| claims.exp()) {
        Some(exp) => now.timestamp() >= exp,
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;

    /// Builds an unsigned token around `payload`.
    pub(crate) fn token_with(payload: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    pub(crate) fn token_expiring_at(exp: i64) -> String {
        token_with(json!({ "sub": "user-1", "exp": exp }))
    }

    #[test]
    fn test_decodes_expiry() {
        let claims = decode_claims(&token_expiring_at(1_900_000_000)).unwrap();
        assert_eq!(claims.exp(), Some(1_900_000_000));
        assert_eq!(claims.get("sub"), Some(&json!("user-1")));
        assert_eq!(
            claims.expires_at(),
            DateTime::from_timestamp(1_900_000_000, 0)
        );
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let body = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":12}"#);
        let token = format!("{header}.{body}.sig");
        assert_eq!(decode_claims(&token).and_then(|c| c.exp()), Some(12));
    }

    #[test]
    fn test_malformed_tokens_yield_no_claims() {
        assert!(decode_claims("malformed").is_none());
        assert!(decode_claims("a.b").is_none());
        assert!(decode_claims("a.b.c.d").is_none());
        assert!(decode_claims("a.!!!.c").is_none());

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        assert!(decode_claims(&not_json).is_none());

        let not_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_claims(&not_object).is_none());
    }

    #[test]
    fn test_missing_or_non_numeric_exp() {
        let claims = decode_claims(&token_with(json!({ "sub": "x" }))).unwrap();
        assert_eq!(claims.exp(), None);

        let claims = decode_claims(&token_with(json!({ "exp": "soon" }))).unwrap();
        assert_eq!(claims.exp(), None);
    }

    #[test]
    fn test_is_token_expired() {
        let now = Utc::now();
        assert!(!is_token_expired(&token_expiring_at(now.timestamp() + 300), now));
        assert!(is_token_expired(&token_expiring_at(now.timestamp() - 1), now));
        assert!(is_token_expired(&token_expiring_at(now.timestamp()), now));
        assert!(is_token_expired("malformed", now));
        assert!(is_token_expired(&token_with(json!({})), now));
    }
}
