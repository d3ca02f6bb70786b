//! Error reporting and the end-of-exchange summary.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::ChatError;
use crate::exchange::{ExchangeStatus, SamplingParams, StreamStats};

/// Sink for failures that end an exchange. The default writes to `log`;
/// hosts may forward elsewhere.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, session_id: &str, error: &ChatError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, session_id: &str, error: &ChatError) {
        if error.is_transport() {
            warn!("session {session_id}: exchange failed: {error}");
        } else {
            error!("session {session_id}: {error}");
        }
    }
}

pub(crate) fn default_reporter() -> Arc<dyn ErrorReporter> {
    Arc::new(LogReporter)
}

/// Machine-readable record of one finished exchange. Never carries the
/// credential.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeSummary<'a> {
    pub session_id: &'a str,
    pub model: &'a str,
    pub turn_counter: u64,
    pub sampling: SamplingParams,
    pub status: &'a ExchangeStatus,
    pub stats: StreamStats,
    pub transcript_len: usize,
}

impl ExchangeSummary<'_> {
    pub fn log(&self) {
        match serde_json::to_string(self) {
            Ok(json) => info!("exchange finished: {json}"),
            Err(error) => debug!("exchange summary not serializable: {error}"),
        }
    }
}

/// Request payload at debug level. The payload holds the transcript but
/// never the key, which only lives in headers.
pub(crate) fn log_request_payload<T: Serialize>(session_id: &str, payload: &T) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match serde_json::to_string(payload) {
        Ok(json) => debug!("session {session_id}: request payload {json}"),
        Err(error) => debug!("session {session_id}: request payload not serializable: {error}"),
    }
}
