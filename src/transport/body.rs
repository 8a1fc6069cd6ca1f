//! Request payloads the transport can send.

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use futures::Stream;
use reqwest::header::CONTENT_TYPE;
use std::pin::Pin;
use std::sync::Mutex;

pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + Sync>>;

/// Body of a backend request.
///
/// Every variant except [`RequestBody::Stream`] can be rebuilt for each retry.
/// A stream body is handed to the first attempt and cannot be sent again.
pub enum RequestBody {
    Empty,
    Text(String),
    Bytes { data: Bytes, content_type: String },
    Json(serde_json::Value),
    Stream(StreamBody),
}

pub struct StreamBody {
    content_type: String,
    inner: Mutex<Option<ByteStream>>,
}

impl StreamBody {
    pub fn new(content_type: impl Into<String>, stream: ByteStream) -> Self {
        Self {
            content_type: content_type.into(),
            inner: Mutex::new(Some(stream)),
        }
    }

    fn take(&self) -> Option<ByteStream> {
        self.inner.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl RequestBody {
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value).map_err(|e| {
            BridgeError::internal(format!("failed to encode backend request: {e}"))
        })?))
    }

    /// Whether the body survives being sent more than once.
    #[must_use]
    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Stream(_))
    }

    pub(crate) fn apply(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match self {
            Self::Empty => builder,
            Self::Text(text) => builder
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text.clone()),
            Self::Bytes { data, content_type } => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()),
            Self::Json(value) => builder.json(value),
            Self::Stream(body) => {
                let stream = body
                    .take()
                    .ok_or_else(|| BridgeError::internal("stream body was already consumed"))?;
                builder
                    .header(CONTENT_TYPE, body.content_type.as_str())
                    .body(reqwest::Body::wrap_stream(stream))
            }
        })
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Bytes { data, content_type } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            Self::Json(_) => f.write_str("Json"),
            Self::Stream(body) => f
                .debug_struct("Stream")
                .field("content_type", &body.content_type)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_stream_body_is_single_use() {
        let body = RequestBody::Stream(StreamBody::new(
            "application/octet-stream",
            Box::pin(stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
                b"abc",
            ))])),
        ));
        assert!(!body.is_replayable());

        let client = reqwest::Client::new();
        assert!(body.apply(client.post("http://localhost/")).is_ok());
        let err = body.apply(client.post("http://localhost/")).unwrap_err();
        assert!(err.message.contains("already consumed"));
    }

    #[test]
    fn test_buffered_bodies_replay() {
        let body = RequestBody::json(&serde_json::json!({"a": 1})).unwrap();
        assert!(body.is_replayable());
        let client = reqwest::Client::new();
        for _ in 0..3 {
            assert!(body.apply(client.post("http://localhost/")).is_ok());
        }
        assert!(RequestBody::Text("hi".into()).is_replayable());
        assert!(RequestBody::Empty.is_replayable());
    }
}
