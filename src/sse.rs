//! Server-Sent-Events decoding for backend streams.
//!
//! [`SseParser`] is a push parser: feed it arbitrary byte slices (split anywhere,
//! including mid-line or mid-codepoint) and it hands back every event completed by
//! a blank line. [`decode_sse`] drives a parser from a byte stream, stops at the
//! `[DONE]` sentinel, and honours a cancellation token.

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Data payload that ends a backend stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>;

#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseEvent,
    has_data: bool,
    event_bytes: usize,
    max_event_bytes: usize,
}

impl SseParser {
    #[must_use]
    pub fn new(max_event_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            current: SseEvent::default(),
            has_data: false,
            event_bytes: 0,
            max_event_bytes,
        }
    }

    /// Feed bytes, returning the events they complete.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(rel) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + rel;
            let line = strip_cr(&self.buffer[consumed..end]).to_vec();
            consumed = end + 1;
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }
        self.buffer.drain(..consumed);

        // An unterminated line still counts against the ceiling.
        if self.event_bytes + self.buffer.len() > self.max_event_bytes {
            return Err(self.oversized());
        }

        Ok(events)
    }

    /// Flush at end of input: a trailing unterminated line and any pending event.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = strip_cr(&self.buffer).to_vec();
            self.buffer.clear();
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<SseEvent>> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }

        self.event_bytes += line.len() + 1;
        if self.event_bytes > self.max_event_bytes {
            return Err(self.oversized());
        }

        if line[0] == b':' {
            return Ok(None);
        }

        let line = std::str::from_utf8(line)
            .map_err(|e| BridgeError::decode(format!("SSE line is not valid UTF-8: {e}")))?;

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            "retry" => {
                let retry = value.trim().parse::<u64>().map_err(|_| {
                    BridgeError::decode(format!("SSE retry field is not an integer: {value:?}"))
                })?;
                self.current.retry = Some(retry);
            }
            _ => {}
        }
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.current);
        let has_data = std::mem::replace(&mut self.has_data, false);
        self.event_bytes = 0;
        (has_data || event.event.is_some()).then_some(event)
    }

    fn oversized(&self) -> BridgeError {
        BridgeError::decode(format!(
            "SSE event exceeds {} byte limit",
            self.max_event_bytes
        ))
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Decode a byte stream into SSE events.
///
/// The sequence ends after the `[DONE]` sentinel (not yielded), at end of input,
/// or after the first error. Cancellation yields a single `Canceled` error and
/// drops `bytes`, which releases the underlying connection.
pub fn decode_sse<S, E>(bytes: S, max_event_bytes: usize, cancel: CancellationToken) -> SseStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut parser = SseParser::new(max_event_bytes);
        let mut bytes = Box::pin(bytes);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = bytes.next() => Some(next),
            };
            let Some(next) = next else {
                yield Err(BridgeError::canceled());
                break;
            };

            let at_eof = next.is_none();
            let parsed = match next {
                Some(Ok(chunk)) => parser.push(&chunk),
                Some(Err(e)) => Err(e.into()),
                None => parser.finish(),
            };

            match parsed {
                Ok(events) => {
                    let mut done = false;
                    for event in events {
                        if event.is_done() {
                            done = true;
                            break;
                        }
                        yield Ok(event);
                    }
                    if done || at_eof {
                        break;
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}
