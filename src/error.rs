//! Error types for the bridge.
//!
//! Every failure carries an [`ErrorKind`] from a fixed taxonomy. The kind decides
//! whether the transport may retry, which HTTP status a non-streaming caller sees,
//! and which `error.type` string goes into the client-protocol envelope.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Payload failed validation.
    InvalidRequest,
    /// Payload exceeded a size ceiling.
    RequestTooLarge,
    /// Credential rejected.
    Authentication,
    PermissionDenied,
    NotFound,
    /// Backend throttling.
    RateLimited,
    /// Backend 5xx or connection failure.
    UpstreamUnavailable,
    /// Backend response violates the expected schema.
    UpstreamProtocol,
    /// Malformed or oversized SSE input.
    Decode,
    Canceled,
    DeadlineExceeded,
    Internal,
}

impl ErrorKind {
    /// The `error.type` value of the client-protocol envelope.
    #[must_use]
    pub fn wire_type(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request_error",
            Self::RequestTooLarge => "request_too_large",
            Self::Authentication => "authentication_error",
            Self::PermissionDenied => "permission_error",
            Self::NotFound => "not_found_error",
            Self::RateLimited => "rate_limit_error",
            Self::DeadlineExceeded => "timeout_error",
            Self::UpstreamUnavailable
            | Self::UpstreamProtocol
            | Self::Decode
            | Self::Canceled
            | Self::Internal => "api_error",
        }
    }

    /// HTTP status for non-streaming callers.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Authentication => 401,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::RequestTooLarge => 413,
            Self::RateLimited => 429,
            Self::Canceled => 499,
            Self::Internal => 500,
            Self::UpstreamUnavailable | Self::UpstreamProtocol | Self::Decode => 502,
            Self::DeadlineExceeded => 504,
        }
    }

    /// Only throttling and unavailability are worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidRequest => "invalid request",
            Self::RequestTooLarge => "request too large",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
            Self::RateLimited => "rate limited",
            Self::UpstreamUnavailable => "upstream unavailable",
            Self::UpstreamProtocol => "upstream protocol",
            Self::Decode => "stream decode",
            Self::Canceled => "canceled",
            Self::DeadlineExceeded => "deadline exceeded",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, msg)
    }

    pub fn too_large(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestTooLarge, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, format!("configuration: {}", msg.into()))
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamProtocol, msg)
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, msg)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "request canceled by caller")
    }

    pub fn deadline(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        // The client carries only a connect timeout; the request deadline is
        // enforced by the transport and surfaces as DeadlineExceeded there.
        if e.is_timeout() {
            Self::unavailable(format!("backend connect timed out: {e}"))
        } else if e.is_decode() {
            Self::protocol(format!("backend body could not be decoded: {e}"))
        } else if e.is_builder() {
            Self::internal(format!("failed to build backend request: {e}"))
        } else {
            // connect, request, body and redirect failures
            Self::unavailable(format!("backend connection failed: {e}"))
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::protocol(format!("JSON error: {e}"))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::internal(format!("IO error: {e}"))
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        Self::config(format!("TOML parse error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_throttling_and_unavailable_retry() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::UpstreamUnavailable.is_retryable());
        assert!(!ErrorKind::UpstreamProtocol.is_retryable());
        assert!(!ErrorKind::Canceled.is_retryable());
        assert!(!ErrorKind::RequestTooLarge.is_retryable());
        assert!(!ErrorKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn test_wire_types() {
        assert_eq!(ErrorKind::UpstreamUnavailable.wire_type(), "api_error");
        assert_eq!(ErrorKind::Internal.wire_type(), "api_error");
        assert_eq!(ErrorKind::RateLimited.wire_type(), "rate_limit_error");
        assert_eq!(ErrorKind::Authentication.http_status(), 401);
    }

    #[test]
    fn test_display_includes_message() {
        let err = BridgeError::invalid_request("model is required");
        assert_eq!(err.to_string(), "invalid request error: model is required");
    }
}
