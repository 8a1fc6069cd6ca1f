//! State machine turning backend streaming chunks into client SSE events.
//!
//! The [`StreamTranslator`] owns one session's lifecycle. Whatever the backend
//! sends, a successful session is always `message_start`, `content_block_start`,
//! `ping`, zero or more `content_block_delta`, `content_block_stop`,
//! `message_delta`, `message_stop`. A failed session ends with a single `error`
//! event and nothing after it.
//!
//! A finish reason only closes the content block. Backends asked for usage send
//! it in a separate chunk after the finish reason, so `message_delta` waits for
//! that chunk, or for the end of input, to report final token counts.

use super::anthropic_types::{
    Delta, ErrorBody, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::errors::map_stream_error;
use super::openai_types::ChatCompletionChunk;
use super::response::{map_finish_reason, map_usage, new_message_id, DEFAULT_STOP_REASON};
use crate::error::{BridgeError, Result};

/// Only one content block is ever opened per session.
const BLOCK_INDEX: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    /// Start events sent, no delta yet.
    SessionOpen,
    BlockOpen,
    /// Finish reason seen; waiting for usage or end of input.
    BlockClosed,
    SessionClosed,
    Errored,
}

/// Usage:
///   let mut translator = StreamTranslator::new("sonnet");
///   send(translator.start());
///   for chunk in backend_chunks {
///       send(translator.process_chunk(&chunk));
///   }
///   send(translator.finish());
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    state: SessionState,
    usage: Usage,
    stop_reason: &'static str,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: new_message_id(),
            state: SessionState::NotStarted,
            usage: Usage::default(),
            stop_reason: DEFAULT_STOP_REASON,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once `message_stop` or `error` has been emitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::SessionClosed | SessionState::Errored)
    }

    /// Open the session. A no-op after the first call.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.state != SessionState::NotStarted {
            return Vec::new();
        }
        self.state = SessionState::SessionOpen;

        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.msg_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Process one backend chunk, returning zero or more client events.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut events = self.start();

        if let Some(usage) = chunk.usage.as_ref() {
            self.usage = map_usage(Some(usage));
        }

        // After the finish reason only a usage report is still expected.
        if self.state == SessionState::BlockClosed {
            if chunk.usage.is_some() {
                events.append(&mut self.close_session());
            }
            return events;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        // Reasoning models stream chain-of-thought in `reasoning_content` and the
        // answer in `content`; both reach the client as text.
        let text = choice
            .delta
            .content
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                choice
                    .delta
                    .reasoning_content
                    .as_deref()
                    .filter(|s| !s.is_empty())
            });

        if let Some(text) = text {
            self.state = SessionState::BlockOpen;
            events.push(StreamEvent::ContentBlockDelta {
                index: BLOCK_INDEX,
                delta: Delta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.stop_reason = map_finish_reason(Some(reason));
            events.push(self.close_block());
            if chunk.usage.is_some() {
                events.append(&mut self.close_session());
            }
        }

        events
    }

    /// End of input. Closes whatever is still open; without a finish reason the
    /// session ends as `end_turn`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut events = self.start();
        if self.state != SessionState::BlockClosed {
            events.push(self.close_block());
        }
        events.append(&mut self.close_session());
        events
    }

    /// Abort the session with an `error` event. Ignored once the session is over.
    pub fn fail(&mut self, err: &BridgeError) -> Vec<StreamEvent> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.state = SessionState::Errored;
        vec![StreamEvent::Error {
            error: ErrorBody::from(err),
        }]
    }

    fn close_block(&mut self) -> StreamEvent {
        self.state = SessionState::BlockClosed;
        StreamEvent::ContentBlockStop { index: BLOCK_INDEX }
    }

    fn close_session(&mut self) -> Vec<StreamEvent> {
        self.state = SessionState::SessionClosed;
        vec![
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(self.stop_reason.to_string()),
                    stop_sequence: None,
                },
                usage: self.usage,
            },
            StreamEvent::MessageStop,
        ]
    }
}

/// Decode one backend SSE data payload. An `{"error": ..}` object is surfaced
/// as a typed error rather than an empty chunk.
pub fn parse_chunk(data: &str) -> Result<ChatCompletionChunk> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| BridgeError::protocol(format!("backend stream chunk is not JSON: {e}")))?;

    if value.get("error").is_some_and(|e| !e.is_null()) {
        return Err(map_stream_error(data.as_bytes()));
    }

    serde_json::from_value(value).map_err(|e| {
        BridgeError::protocol(format!("backend stream chunk has an unexpected shape: {e}"))
    })
}
