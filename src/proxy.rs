//! Per-request orchestration: translate, call the backend, translate back.
//!
//! Streaming requests run a single producer task per request. It decodes backend
//! events, feeds them through a [`StreamTranslator`] and pushes client events into
//! a bounded channel, so a slow client applies backpressure all the way to the
//! backend socket. A dropped receiver cancels the request and releases the
//! backend connection.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogLevel, SharedLogger};
use crate::models::ModelAliasTable;
use crate::services;
use crate::transport::{Transport, TransportConfig};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::{parse_chunk, StreamTranslator};

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Client events for one streaming response, in emission order.
pub type EventStream = ReceiverStream<StreamEvent>;

/// Everything a request needs, shared by all requests.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub transport: Transport,
    pub models: Arc<ModelAliasTable>,
    pub max_tokens_ceiling: u64,
    pub channel_capacity: usize,
    /// Longest wait for the next backend event once a stream is open.
    pub stream_idle_timeout: Duration,
    pub logger: SharedLogger,
}

impl ProxyContext {
    pub fn from_config(config: &BridgeConfig, logger: SharedLogger) -> Result<Self> {
        let transport = Transport::new(TransportConfig::from_config(config)?, logger.clone())?;
        Ok(Self {
            transport,
            models: Arc::new(ModelAliasTable::from_config(&config.models)),
            max_tokens_ceiling: config.limits.max_tokens_ceiling,
            channel_capacity: config.stream.channel_capacity,
            stream_idle_timeout: config.request_timeout(),
            logger,
        })
    }
}

/// Forward a non-streaming request.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    ctx: &ProxyContext,
    cancel: &CancellationToken,
) -> Result<MessagesResponse> {
    let backend_req = anthropic_to_openai(req, &ctx.models, ctx.max_tokens_ceiling)?;

    ctx.logger.info(
        "proxy",
        format!(
            "POST {} model={} -> {}",
            services::CHAT_COMPLETIONS_PATH,
            req.model,
            backend_req.model
        ),
    );

    let backend_resp = services::chat_completion(&ctx.transport, &backend_req, cancel).await?;
    let resp = openai_to_anthropic(&backend_resp, &req.model)?;

    ctx.logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens stop={}",
            resp.usage.input_tokens,
            resp.usage.output_tokens,
            resp.stop_reason.as_deref().unwrap_or("-")
        ),
    );

    Ok(resp)
}

/// Start a streaming request.
///
/// Validation failures come back as `Err` so the caller can still answer with a
/// plain HTTP error. Everything after that, backend failures included, arrives
/// inside the returned stream.
pub fn proxy_streaming(
    req: &MessagesRequest,
    ctx: &ProxyContext,
    cancel: CancellationToken,
) -> Result<EventStream> {
    let backend_req = anthropic_to_openai(req, &ctx.models, ctx.max_tokens_ceiling)?;

    ctx.logger.info(
        "proxy",
        format!(
            "POST {} model={} -> {} (streaming)",
            services::CHAT_COMPLETIONS_PATH,
            req.model,
            backend_req.model
        ),
    );

    let (tx, rx) = mpsc::channel(ctx.channel_capacity.max(1));
    tokio::spawn(pump(ctx.clone(), backend_req, req.model.clone(), tx, cancel));
    Ok(ReceiverStream::new(rx))
}

/// Send events in order. False once the client has gone away.
async fn send_all(tx: &mpsc::Sender<StreamEvent>, events: Vec<StreamEvent>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

async fn pump(
    ctx: ProxyContext,
    backend_req: ChatCompletionRequest,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let mut translator = StreamTranslator::new(&model);

    let connect = services::chat_completion_stream(&ctx.transport, &backend_req, &cancel);
    let connected = tokio::select! {
        biased;
        () = tx.closed() => {
            cancel.cancel();
            ctx.logger.info("stream", "Client disconnected before the backend answered");
            return;
        }
        connected = connect => connected,
    };

    let mut events = match connected {
        Ok(events) => events,
        Err(err) => {
            ctx.logger.warn("stream", format!("Backend stream failed to open: {err}"));
            let _ = send_all(&tx, translator.fail(&err)).await;
            return;
        }
    };

    if !send_all(&tx, translator.start()).await {
        cancel.cancel();
        return;
    }

    let mut deltas: usize = 0;
    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => None,
            next = tokio::time::timeout(ctx.stream_idle_timeout, events.next()) => Some(next),
        };
        let Some(next) = next else {
            cancel.cancel();
            ctx.logger.info("stream", "Client disconnected, backend stream released");
            return;
        };

        let out = match next {
            Ok(Some(Ok(event))) => match parse_chunk(&event.data) {
                Ok(chunk) => translator.process_chunk(&chunk),
                Err(err) => translator.fail(&err),
            },
            Ok(Some(Err(err))) => translator.fail(&err),
            Ok(None) => translator.finish(),
            Err(_) => translator.fail(&BridgeError::deadline(format!(
                "no backend event within {}s",
                ctx.stream_idle_timeout.as_secs_f64()
            ))),
        };

        deltas += out
            .iter()
            .filter(|e| matches!(e, StreamEvent::ContentBlockDelta { .. }))
            .count();
        if let Some(StreamEvent::Error { error }) = out.last() {
            ctx.logger.log_with_context(
                LogLevel::Warn,
                "stream",
                format!("Stream aborted: {}", error.message),
                serde_json::json!({"type": error.error_type, "deltas": deltas}),
            );
        }

        if !send_all(&tx, out).await {
            cancel.cancel();
            ctx.logger.info("stream", "Client disconnected, backend stream released");
            return;
        }
        if translator.is_terminal() {
            break;
        }
    }

    // Dropping the decoder here closes the backend connection even if the
    // backend kept sending after the usage report.
    drop(events);
    ctx.logger.debug("stream", format!("Stream completed with {deltas} deltas"));
}
