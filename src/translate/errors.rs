//! Backend error shapes to the client error taxonomy.
//!
//! The backend's own `error.type` / `error.code` wins when it names a known
//! category; otherwise the HTTP status decides. Anything left over becomes an
//! `api_error` that keeps the backend's message.

use super::openai_types::ChatErrorResponse;
use crate::error::{BridgeError, ErrorKind};

const MAX_RAW_MESSAGE: usize = 500;

/// Classify a non-2xx backend response.
pub fn map_backend_error(status: u16, body: &[u8]) -> BridgeError {
    classify(Some(status), body)
}

/// Classify an error object the backend sent in place of a stream chunk.
/// The HTTP status was already 200, so unlabelled errors count as unavailability.
pub fn map_stream_error(body: &[u8]) -> BridgeError {
    classify(None, body)
}

fn classify(status: Option<u16>, body: &[u8]) -> BridgeError {
    let parsed = serde_json::from_slice::<ChatErrorResponse>(body).ok();

    let message = match &parsed {
        Some(resp) if !resp.error.message.is_empty() => resp.error.message.clone(),
        _ => raw_message(status, body),
    };

    let by_type = parsed.as_ref().and_then(|resp| {
        let code = resp.error.code.as_ref().and_then(|c| c.as_str());
        resp.error
            .error_type
            .as_deref()
            .and_then(kind_for_label)
            .or_else(|| code.and_then(kind_for_label))
    });

    let kind = match status {
        Some(status) => by_type
            .or_else(|| kind_for_status(status))
            .unwrap_or(ErrorKind::Internal),
        None => by_type.unwrap_or(ErrorKind::UpstreamUnavailable),
    };

    BridgeError::new(kind, message)
}

fn kind_for_label(label: &str) -> Option<ErrorKind> {
    Some(match label {
        "invalid_request_error" | "invalid_request" | "invalid_parameter"
        | "missing_parameter" | "invalid_model" | "validation_error" => ErrorKind::InvalidRequest,
        "authentication_error" | "invalid_api_key" | "unauthorized" => ErrorKind::Authentication,
        "permission_error" | "forbidden" | "insufficient_quota" | "quota_exceeded" => {
            ErrorKind::PermissionDenied
        }
        "not_found_error" | "not_found" | "model_not_found" => ErrorKind::NotFound,
        "rate_limit_error" | "rate_limit_exceeded" | "too_many_requests" => ErrorKind::RateLimited,
        "request_too_large" | "payload_too_large" => ErrorKind::RequestTooLarge,
        "server_error" | "internal_error" | "service_unavailable" | "overloaded_error"
        | "bad_gateway" => ErrorKind::UpstreamUnavailable,
        "timeout_error" | "request_timeout" | "gateway_timeout" => ErrorKind::DeadlineExceeded,
        _ => return None,
    })
}

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    Some(match status {
        400 | 422 => ErrorKind::InvalidRequest,
        401 => ErrorKind::Authentication,
        403 => ErrorKind::PermissionDenied,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::DeadlineExceeded,
        413 => ErrorKind::RequestTooLarge,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::UpstreamUnavailable,
        _ => return None,
    })
}

fn raw_message(status: Option<u16>, body: &[u8]) -> String {
    let prefix = match status {
        Some(status) => format!("backend returned status {status}"),
        None => "backend reported a stream error".to_string(),
    };
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return prefix;
    }
    let mut end = text.len().min(MAX_RAW_MESSAGE);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{prefix}: {}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json).unwrap()
    }

    #[test]
    fn test_backend_type_takes_precedence() {
        let err = map_backend_error(
            400,
            &body(serde_json::json!({"error": {"type": "rate_limit_error", "message": "slow"}})),
        );
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.message, "slow");
    }

    #[test]
    fn test_code_used_when_type_unknown() {
        let err = map_backend_error(
            401,
            &body(serde_json::json!({
                "error": {"type": "new_api_error", "code": "invalid_api_key", "message": "bad key"}
            })),
        );
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.kind.wire_type(), "authentication_error");
    }

    #[test]
    fn test_status_fallback() {
        let cases = [
            (400, ErrorKind::InvalidRequest),
            (401, ErrorKind::Authentication),
            (403, ErrorKind::PermissionDenied),
            (404, ErrorKind::NotFound),
            (408, ErrorKind::DeadlineExceeded),
            (413, ErrorKind::RequestTooLarge),
            (429, ErrorKind::RateLimited),
            (503, ErrorKind::UpstreamUnavailable),
        ];
        for (status, kind) in cases {
            assert_eq!(map_backend_error(status, b"").kind, kind, "status {status}");
        }
    }

    #[test]
    fn test_unclassified_keeps_original_message() {
        let err = map_backend_error(418, b"I'm a teapot");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.kind.wire_type(), "api_error");
        assert!(err.message.contains("I'm a teapot"));
        assert!(err.message.contains("418"));
    }

    #[test]
    fn test_stream_error_defaults_to_unavailable() {
        let err = map_stream_error(br#"{"error": {"message": "upstream overloaded"}}"#);
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(err.message, "upstream overloaded");

        let err = map_stream_error(br#"{"error": {"type": "rate_limit_error", "message": "x"}}"#);
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_numeric_code_and_long_body() {
        let err = map_backend_error(
            500,
            &body(serde_json::json!({"error": {"code": 500, "message": "boom"}})),
        );
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(err.message, "boom");

        let long = "é".repeat(600);
        let err = map_backend_error(502, long.as_bytes());
        assert!(err.message.len() < 600 * 2);
    }
}
