use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::deployer::Error;

/// Reads the `aud` claim from a JWT without verifying it.
///
/// Service-account tokens carry either a single audience string or a list; the
/// first entry of a list is the API server's own audience.
pub fn audience_from_token(token: &str) -> Result<String, Error> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::TokenUnavailable("token is not a JWT".into()))?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::TokenUnavailable(format!("undecodable token payload: {}", e)))?;
    let claims: Value = serde_json::from_slice(&decoded)?;

    let audience = match claims.get("aud") {
        Some(Value::String(aud)) => Some(aud.clone()),
        Some(Value::Array(auds)) => auds.first().and_then(Value::as_str).map(String::from),
        _ => None,
    };
    match audience {
        Some(aud) if !aud.is_empty() => Ok(aud),
        _ => Err(Error::TokenUnavailable("token has no aud claim".into())),
    }
}

#[cfg(test)]
pub(crate) fn token_with_claims(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"test"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}
