use crate::config::{BridgeConfig, CorsConfig};
use crate::error::{BridgeError, Result};
use crate::logging::SharedLogger;
use crate::proxy::{self, ProxyContext};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, StreamEvent};

use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "claude-bridge";

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub proxy: ProxyContext,
    pub logger: SharedLogger,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: BridgeConfig, logger: SharedLogger) -> Result<Self> {
        let proxy = ProxyContext::from_config(&config, logger.clone())?;
        Ok(Self {
            config,
            proxy,
            logger,
            started: Instant::now(),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let max_request_bytes = state.config.limits.max_request_bytes;
    let cors = state.config.cors.enabled.then(|| cors_layer(&state.config.cors));

    let router = Router::new()
        .route(
            "/v1/messages",
            post(handle_messages).fallback(handle_method_not_allowed),
        )
        .route(
            "/health",
            get(handle_health).fallback(handle_method_not_allowed),
        )
        .route("/info", get(handle_info).fallback(handle_method_not_allowed))
        .route(
            "/v1/models",
            get(handle_models).fallback(handle_method_not_allowed),
        )
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(max_request_bytes));

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins = if cors.allow_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(cors.allow_origins.iter().filter_map(|o| o.parse::<HeaderValue>().ok()))
    };
    let methods = if cors.allow_methods.iter().any(|m| m == "*") {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(
            cors.allow_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok()),
        )
    };
    let headers = if cors.allow_headers.iter().any(|h| h == "*") {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(
            cors.allow_headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

/// Client-protocol error envelope with the status its kind maps to.
pub fn error_response(err: &BridgeError) -> Response {
    let status =
        StatusCode::from_u16(err.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err))).into_response()
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let req = match parse_messages_request(&headers, body) {
        Ok(req) => req,
        Err(err) => {
            state
                .logger
                .warn("server", format!("Rejected request: {}", err.message));
            return error_response(&err);
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    state.logger.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            is_streaming,
            req.messages.len()
        ),
    );

    if is_streaming {
        handle_streaming(&state, &req)
    } else {
        handle_non_streaming(&state, &req).await
    }
}

fn parse_messages_request(
    headers: &HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<MessagesRequest> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("application/json") {
        return Err(BridgeError::invalid_request(
            "content-type must be application/json",
        ));
    }

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            BridgeError::too_large("request body too large")
        } else {
            BridgeError::invalid_request(format!("failed to read request body: {rejection}"))
        }
    })?;

    serde_json::from_slice(&body)
        .map_err(|e| BridgeError::invalid_request(format!("failed to parse request: {e}")))
}

async fn handle_non_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    // Axum drops this future when the client goes away; the guard turns that
    // into a cancellation of the backend call.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match proxy::proxy_non_streaming(req, &state.proxy, &cancel).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => {
            state.logger.error("server", format!("Proxy error: {err}"));
            error_response(&err)
        }
    }
}

fn handle_streaming(state: &AppState, req: &MessagesRequest) -> Response {
    let events = match proxy::proxy_streaming(req, &state.proxy, CancellationToken::new()) {
        Ok(events) => events,
        Err(err) => {
            state.logger.warn("server", format!("Streaming rejected: {err}"));
            return error_response(&err);
        }
    };

    let sse = events.map(|event| -> std::result::Result<Event, Infallible> { Ok(sse_event(&event)) });

    Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
}

fn sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.event_name()).data(data),
        Err(e) => {
            let err = BridgeError::internal(format!("failed to encode stream event: {e}"));
            let data = serde_json::to_string(&ErrorResponse::from(&err)).unwrap_or_default();
            Event::default().event("error").data(data)
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": format!("{}s", state.started.elapsed().as_secs()),
    }))
}

async fn handle_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Messages API front end for Chat-Completions backends",
        "endpoints": ["POST /v1/messages", "GET /health", "GET /info", "GET /v1/models"],
        "supported_models": state.proxy.models.aliases(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .proxy
        .models
        .aliases()
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "resolves_to": state.proxy.models.resolve(name),
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

async fn handle_not_found(uri: Uri) -> Response {
    let err = ErrorResponse::invalid_request(format!("endpoint not found: {}", uri.path()));
    (StatusCode::NOT_FOUND, Json(err)).into_response()
}

async fn handle_method_not_allowed(method: Method) -> Response {
    let err = ErrorResponse::invalid_request(format!("method not allowed: {method}"));
    (StatusCode::METHOD_NOT_ALLOWED, Json(err)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers
    }

    #[test]
    fn test_content_type_is_required() {
        let body = Ok(Bytes::from_static(b"{}"));
        let err = parse_messages_request(&HeaderMap::new(), body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(err.message.contains("content-type"));
    }

    #[test]
    fn test_malformed_json_is_invalid_request() {
        let body = Ok(Bytes::from_static(b"{not json"));
        let err = parse_messages_request(&json_headers(), body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(err.message.starts_with("failed to parse request"));
    }

    #[test]
    fn test_charset_suffix_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        let body = Ok(Bytes::from_static(
            br#"{"model":"haiku","max_tokens":5,"messages":[]}"#,
        ));
        let req = parse_messages_request(&headers, body).unwrap();
        assert_eq!(req.model, "haiku");
    }

    #[test]
    fn test_error_response_status_follows_kind() {
        let resp = error_response(&BridgeError::new(ErrorKind::RateLimited, "slow down"));
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let resp = error_response(&BridgeError::too_large("big"));
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
