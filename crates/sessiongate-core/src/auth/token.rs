//! Local decoding of access tokens.
//!
//! Tokens are opaque apart from the `exp` claim in the payload segment.
//! Signatures are not verified; the server does that on every request.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

/// URL-safe base64 that accepts both padded and unpadded segments
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token does not have three dot-separated segments")]
    Segments,

    #[error("Token payload is not valid base64: {0}")]
    Encoding(String),

    #[error("Token payload is not a JSON object: {0}")]
    Payload(String),

    #[error("Token payload has no usable exp claim")]
    MissingExpiry,
}

#[derive(Debug, Deserialize)]
struct Claims {
    // Seconds since epoch; some issuers emit fractional values
    exp: Option<f64>,
}

/// Extract the expiration instant from a signed token without a network call.
pub fn expiry(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(TokenError::Segments),
    };

    let bytes = SEGMENT_ENGINE
        .decode(payload)
        .map_err(|e| TokenError::Encoding(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))?;

    let exp = claims.exp.filter(|e| e.is_finite()).ok_or(TokenError::MissingExpiry)?;
    let secs = exp.floor();
    let nanos = ((exp - secs) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs as i64, nanos).ok_or(TokenError::MissingExpiry)
}

/// Access/refresh pair with the decoded access expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn from_tokens(access_token: String, refresh_token: Option<String>) -> Result<Self, TokenError> {
        let expires_at = expiry(&access_token)?;
        Ok(Self {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// A token stays valid through its `exp` instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

/// Unsigned token carrying the given `exp`, for tests.
#[cfg(test)]
pub(crate) fn unsigned_token(exp: i64) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"token_type":"access","exp":{},"user_id":7}}"#, exp));
    format!("{}.{}.c2ln", header, payload)
}
