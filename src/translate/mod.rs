//! Protocol translation between the client Messages API and the backend Chat
//! Completions API.
//!
//! Requests, responses, errors and streaming events are converted here. Every
//! translation function is pure (no I/O); the stream translator keeps only
//! per-session state.

pub mod anthropic_types;
pub mod errors;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
