#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use streamchat::completion_api::{
    CancellationSignal, ChatRequest, CompletionApiError, RecordStream, StatusCode,
};
use streamchat::{
    AdmissionControl, AdmissionLimits, ChatError, CompletionTransport, ErrorReporter, Session,
    SessionConfig,
};

/// One scripted response.
pub enum Script {
    /// Body chunks followed by end of stream.
    Body(Vec<Result<Vec<u8>, CompletionApiError>>),
    /// Body chunks, then the body never ends.
    Stalled(Vec<Vec<u8>>),
    /// Rejected before any body arrives.
    Reject(CompletionApiError),
}

/// In-memory transport that replays scripts in order and records requests.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl CompletionTransport for ScriptedTransport {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        _cancellation: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<RecordStream, CompletionApiError>> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or_else(|| Script::Body(Vec::new()));

        Box::pin(async move {
            match script {
                Script::Body(chunks) => Ok(RecordStream::new(200, stream::iter(chunks).boxed())),
                Script::Stalled(chunks) => {
                    let chunks = stream::iter(chunks.into_iter().map(Ok::<_, CompletionApiError>))
                        .chain(stream::pending());
                    Ok(RecordStream::new(200, chunks.boxed()))
                }
                Script::Reject(error) => Err(error),
            }
        })
    }
}

/// Transport whose request future panics.
pub struct PanickingTransport;

impl CompletionTransport for PanickingTransport {
    fn open<'a>(
        &'a self,
        _request: &'a ChatRequest,
        _cancellation: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<RecordStream, CompletionApiError>> {
        Box::pin(connect_and_panic())
    }
}

async fn connect_and_panic() -> Result<RecordStream, CompletionApiError> {
    panic!("transport blew up while connecting")
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<String>>,
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, _session_id: &str, error: &ChatError) {
        self.reports
            .lock()
            .expect("reports lock")
            .push(error.to_string());
    }
}

pub fn delta_record(content: &str) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({"choices": [{"delta": {"content": content}}]})
    )
}

/// A full body: stream-open record, one record per fragment, `[DONE]`.
pub fn body(fragments: &[&str]) -> Vec<Result<Vec<u8>, CompletionApiError>> {
    let mut text = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n");
    for fragment in fragments {
        text.push_str(&delta_record(fragment));
    }
    text.push_str("data: [DONE]\n");
    vec![Ok(text.into_bytes())]
}

pub fn chunk(text: &str) -> Result<Vec<u8>, CompletionApiError> {
    Ok(text.as_bytes().to_vec())
}

pub fn connection_reset() -> CompletionApiError {
    CompletionApiError::Status(StatusCode::BAD_GATEWAY, "connection reset".to_string())
}

pub fn config() -> SessionConfig {
    SessionConfig::default()
        .with_endpoint("http://127.0.0.1:9/v1")
        .with_api_key("sk-test")
}

pub fn session(transport: Arc<ScriptedTransport>) -> Session {
    Session::with_transport(config(), transport, AdmissionControl::default())
}

pub fn shared_admission(max_active: usize, max_queued: usize) -> AdmissionControl {
    AdmissionControl::new(AdmissionLimits {
        max_active,
        max_queued,
    })
}
