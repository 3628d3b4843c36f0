//! Claims decoding and expiry evaluation for bearer tokens.
//!
//! Tokens are three dot-separated segments; only the middle (claims)
//! segment is read here. Signatures are never checked, that is the
//! server's job. Anything that cannot be decoded is treated as absent,
//! and an absent or claimless token is always expired.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use tracing::debug;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// base64url, padded or not (what JWT issuers emit)
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Standard alphabet, accepted for issuers that don't use base64url
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// Decoded claims segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Expiry, seconds since the epoch (may be fractional)
    pub exp: Option<f64>,
    /// Every other claim, untouched
    pub extra: Map<String, Value>,
}

impl Claims {
    fn from_object(mut object: Map<String, Value>) -> Self {
        let exp = object.remove("exp").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            _ => None,
        });
        Self { exp, extra: object }
    }

    /// Expiry in milliseconds; a zero `exp` counts as missing
    fn exp_millis(&self) -> Option<f64> {
        self.exp.filter(|exp| *exp != 0.0).map(|exp| exp * 1000.0)
    }

    /// `None` when there is no expiry or it is outside the representable range
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp_millis()
            .and_then(|millis| DateTime::from_timestamp_millis(millis.round() as i64))
    }
}

/// Decode the claims segment of a token.
///
/// Returns `None` for an absent token, fewer than two segments, an empty
/// claims segment, invalid base64, or a segment that isn't a JSON object.
pub fn decode(token: Option<&str>) -> Option<Claims> {
    let token = token?;
    let segment = token.split('.').nth(1).filter(|s| !s.is_empty())?;

    let bytes = match URL_SAFE_LENIENT
        .decode(segment)
        .or_else(|_| STANDARD_LENIENT.decode(segment))
    {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "Token claims segment is not base64");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(object)) => Some(Claims::from_object(object)),
        Ok(_) => {
            debug!("Token claims segment is not a JSON object");
            None
        }
        Err(e) => {
            debug!(error = %e, "Token claims segment is not JSON");
            None
        }
    }
}

/// When the token expires, if it carries a usable expiry claim
pub fn expiration_instant(token: Option<&str>) -> Option<DateTime<Utc>> {
    decode(token)?.expires_at()
}

pub fn is_expired(token: Option<&str>) -> bool {
    is_expired_at(token, Utc::now())
}

/// Expired iff `now` is strictly past the expiry, compared in milliseconds.
///
/// An expiry too far out to be a calendar instant still counts as valid.
pub fn is_expired_at(token: Option<&str>, now: DateTime<Utc>) -> bool {
    match decode(token).and_then(|claims| claims.exp_millis()) {
        Some(exp_millis) => now.timestamp_millis() as f64 > exp_millis,
        None => true,
    }
}

pub fn remaining_time(token: Option<&str>) -> Duration {
    remaining_time_at(token, Utc::now())
}

/// Time left before expiry; zero without an expiry, negative once expired.
pub fn remaining_time_at(token: Option<&str>, now: DateTime<Utc>) -> Duration {
    match expiration_instant(token) {
        Some(expires_at) => expires_at - now,
        None => Duration::zero(),
    }
}

/// Expiry snapshot for both tokens of a session, for countdown displays.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub access_expires_at: Option<DateTime<Utc>>,
    pub access_remaining: Duration,
    pub refresh_expires_at: Option<DateTime<Utc>>,
    pub refresh_remaining: Duration,
}

impl TokenInfo {
    pub fn at(access_token: Option<&str>, refresh_token: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            access_expires_at: expiration_instant(access_token),
            access_remaining: remaining_time_at(access_token, now),
            refresh_expires_at: expiration_instant(refresh_token),
            refresh_remaining: remaining_time_at(refresh_token, now),
        }
    }

    /// Neither token carries a readable expiry
    pub fn is_empty(&self) -> bool {
        self.access_expires_at.is_none() && self.refresh_expires_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_token, token_with_claims};
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;

    #[test]
    fn test_decode_reads_exp_and_extra_claims() {
        let token = token_with_claims(json!({"exp": 1_700_000_000, "sub": "alice"}));
        let claims = decode(Some(&token)).unwrap();
        assert_eq!(claims.exp, Some(1_700_000_000.0));
        assert_eq!(claims.extra.get("sub"), Some(&json!("alice")));
        assert!(!claims.extra.contains_key("exp"));
    }

    #[test]
    fn test_decode_malformed_tokens_are_absent() {
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        let array = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        let cases = [
            "",
            "no-dots-at-all",
            "header.",
            "header..sig",
            "header.!!!not-base64!!!.sig",
            not_json.as_str(),
            array.as_str(),
        ];
        for case in cases {
            assert!(decode(Some(case)).is_none(), "decoded {:?}", case);
            assert!(is_expired(Some(case)), "not expired: {:?}", case);
        }
        assert!(decode(None).is_none());
    }

    #[test]
    fn test_decode_accepts_two_segments_and_padded_standard_base64() {
        let payload = STANDARD.encode(r#"{"exp":1700000000,"note":"abcd"}"#);
        assert!(payload.ends_with('='));
        let claims = decode(Some(&format!("header.{}", payload))).unwrap();
        assert_eq!(claims.exp, Some(1_700_000_000.0));
    }

    #[test]
    fn test_absent_token_is_expired() {
        assert!(is_expired(None));
        assert_eq!(remaining_time(None), Duration::zero());
        assert!(expiration_instant(None).is_none());
    }

    #[test]
    fn test_token_without_exp_is_expired() {
        let token = token_with_claims(json!({"sub": "alice"}));
        assert!(decode(Some(&token)).is_some());
        assert!(is_expired(Some(&token)));
        assert!(expiration_instant(Some(&token)).is_none());
    }

    #[test]
    fn test_non_numeric_exp_is_expired() {
        let token = token_with_claims(json!({"exp": "tomorrow"}));
        assert!(is_expired(Some(&token)));
    }

    #[test]
    fn test_expiry_boundaries() {
        let now = Utc::now();
        let past = make_token(now.timestamp() - 1);
        let future = make_token(now.timestamp() + 60);

        assert!(is_expired_at(Some(&past), now));
        assert!(!is_expired_at(Some(&future), now));
    }

    #[test]
    fn test_expiry_is_strictly_greater() {
        let exp = 1_700_000_000;
        let token = make_token(exp);
        let at_expiry = DateTime::from_timestamp(exp, 0).unwrap();

        assert!(!is_expired_at(Some(&token), at_expiry));
        assert!(is_expired_at(Some(&token), at_expiry + Duration::milliseconds(1)));
    }

    #[test]
    fn test_fractional_exp_keeps_milliseconds() {
        let token = token_with_claims(json!({"exp": 100.9}));
        let at = |millis| DateTime::from_timestamp_millis(millis).unwrap();

        assert!(!is_expired_at(Some(&token), at(100_500)));
        assert!(!is_expired_at(Some(&token), at(100_900)));
        assert!(is_expired_at(Some(&token), at(100_901)));
        assert_eq!(expiration_instant(Some(&token)), Some(at(100_900)));
    }

    #[test]
    fn test_out_of_range_exp_is_not_expired() {
        let token = token_with_claims(json!({"exp": 1e300}));

        assert!(!is_expired(Some(&token)));
        assert!(expiration_instant(Some(&token)).is_none());
        assert_eq!(remaining_time(Some(&token)), Duration::zero());
    }

    #[test]
    fn test_zero_exp_is_expired() {
        let token = make_token(0);
        assert!(is_expired(Some(&token)));
        assert!(expiration_instant(Some(&token)).is_none());
    }

    #[test]
    fn test_remaining_time_projection() {
        let exp = 1_700_000_000;
        let token = make_token(exp);
        let now = DateTime::from_timestamp(exp - 90, 0).unwrap();

        assert_eq!(remaining_time_at(Some(&token), now), Duration::seconds(90));
        assert_eq!(
            remaining_time_at(Some(&token), now + Duration::seconds(100)),
            Duration::seconds(-10)
        );
        assert_eq!(
            expiration_instant(Some(&token)),
            DateTime::from_timestamp(exp, 0)
        );
    }

    #[test]
    fn test_token_info_snapshot() {
        let exp = 1_700_000_000;
        let now = DateTime::from_timestamp(exp - 30, 0).unwrap();
        let access = make_token(exp);

        let info = TokenInfo::at(Some(&access), Some("garbage"), now);
        assert_eq!(info.access_remaining, Duration::seconds(30));
        assert!(info.refresh_expires_at.is_none());
        assert_eq!(info.refresh_remaining, Duration::zero());
        assert!(!info.is_empty());
        assert!(TokenInfo::at(None, None, now).is_empty());
    }
}
