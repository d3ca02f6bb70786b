//! Transport-only primitives for streamed chat-completion endpoints.
//!
//! This crate owns request building, header construction, newline-delimited
//! record framing, and per-record decoding. It holds no conversation state and
//! never retries: a failed request is reported once and left to the caller.
//!
//! Record decoding is deliberately narrow. A record is either blank, the
//! `[DONE]` sentinel, or a JSON object carrying `choices[0].delta.content`;
//! everything else surfaces as a [`RecordError`] that callers are expected to
//! count and skip.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod payload;
pub mod records;
pub mod url;

pub use client::{CancellationSignal, ChunkStream, CompletionClient, RecordStream, StreamResult};
pub use config::CompletionApiConfig;
pub use error::CompletionApiError;
pub use payload::{ChatMessage, ChatRequest, ChatRole};
pub use records::{decode_record, RecordError, RecordSplitter, StreamRecord};
pub use url::normalize_completions_url;
pub use reqwest::StatusCode;
