use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Validation(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid credential header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Closed classification of a failed request, detached from the error value
/// so it can be cloned and shared between waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    RateLimited,
    Server,
    InvalidResponse,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Network => "network",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Forbidden => "forbidden",
            FailureKind::NotFound => "not found",
            FailureKind::Validation => "validation",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Server => "server",
            FailureKind::InvalidResponse => "invalid response",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Error body shapes the auth service is known to return.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized(truncated),
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            400..=422 => ApiError::Validation(truncated),
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::AccessDenied(_) => FailureKind::Forbidden,
            ApiError::Unauthorized(_) => FailureKind::Unauthorized,
            ApiError::NotFound(_) => FailureKind::NotFound,
            ApiError::Validation(_) => FailureKind::Validation,
            ApiError::RateLimited => FailureKind::RateLimited,
            ApiError::ServerError(_) => FailureKind::Server,
            ApiError::NetworkError(_) => FailureKind::Network,
            ApiError::InvalidHeader(_) => FailureKind::Other,
            ApiError::InvalidResponse(_) => FailureKind::InvalidResponse,
        }
    }

    /// Server-provided message from an `{"error": ..}` or `{"detail": ..}` body.
    pub fn detail(&self) -> Option<String> {
        let body = match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::Validation(body) => body,
            _ => return None,
        };
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        parsed.error.or(parsed.detail).filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status_taxonomy() {
        let kind = |code: u16| ApiError::from_status(StatusCode::from_u16(code).unwrap(), "").kind();
        assert_eq!(kind(401), FailureKind::Unauthorized);
        assert_eq!(kind(403), FailureKind::Forbidden);
        assert_eq!(kind(404), FailureKind::NotFound);
        assert_eq!(kind(400), FailureKind::Validation);
        assert_eq!(kind(422), FailureKind::Validation);
        assert_eq!(kind(429), FailureKind::RateLimited);
        assert_eq!(kind(500), FailureKind::Server);
        assert_eq!(kind(503), FailureKind::Server);
        assert_eq!(kind(302), FailureKind::InvalidResponse);
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("520 total bytes"));
        assert_eq!(ApiError::truncate_body("short"), "short");
    }

    #[test]
    fn test_detail_prefers_error_field() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, r#"{"error": "Invalid password."}"#);
        assert_eq!(err.detail().as_deref(), Some("Invalid password."));

        let err = ApiError::from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"detail": "No active account found with the given credentials"}"#,
        );
        assert_eq!(
            err.detail().as_deref(),
            Some("No active account found with the given credentials")
        );

        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "<html>oops</html>");
        assert_eq!(err.detail(), None);
        assert_eq!(ApiError::RateLimited.detail(), None);
    }
}
