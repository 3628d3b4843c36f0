//! Shared helpers for building unsigned test tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::{json, Value};

/// Header, claims and a dummy signature, base64url encoded like a real JWT.
pub fn token_with_claims(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

pub fn make_token(exp: i64) -> String {
    token_with_claims(json!({"exp": exp, "sub": "tester"}))
}

/// Token that expires `secs` seconds from now (negative for already expired)
pub fn token_expiring_in(secs: i64) -> String {
    make_token(Utc::now().timestamp() + secs)
}

/// Valid for an hour; `label` keeps otherwise identical tokens distinct
pub fn fresh_token(label: &str) -> String {
    token_with_claims(json!({"exp": Utc::now().timestamp() + 3600, "sub": label}))
}
