use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::config::CompletionApiConfig;
use crate::error::{parse_error_message, CompletionApiError};
use crate::headers::build_headers;
use crate::payload::{ChatRequest, ChatRole};
use crate::records::RecordSplitter;
use crate::url::normalize_completions_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

/// Raw body chunks as delivered by the transport.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, CompletionApiError>>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct CompletionClient {
    http: Client,
    config: CompletionApiConfig,
}

/// Every record of one stream, collected. Test support; sessions stream.
#[doc(hidden)]
#[derive(Debug, Clone)]
pub struct StreamResult {
    pub http_status: u16,
    pub records: Vec<Vec<u8>>,
}

impl CompletionClient {
    pub fn new(config: CompletionApiConfig) -> Result<Self, CompletionApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(CompletionApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CompletionApiConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        normalize_completions_url(&self.config.endpoint)
    }

    pub fn build_headers(&self, user_agent: Option<&str>) -> Result<HeaderMap, CompletionApiError> {
        let headers = build_headers(&self.config, user_agent)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    CompletionApiError::InvalidHeader(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    CompletionApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, CompletionApiError> {
        validate_request_payload_shape(request)?;

        let endpoint = self.endpoint();
        reqwest::Url::parse(&endpoint)
            .map_err(|error| CompletionApiError::InvalidEndpoint(format!("{endpoint}: {error}")))?;

        let headers = self.build_headers(self.config.user_agent.as_deref())?;
        let payload = request_with_transport_defaults(request);
        Ok(self.http.post(endpoint).headers(headers).json(&payload))
    }

    /// Send one request. A non-success status is an error; nothing is retried.
    pub async fn send(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, CompletionApiError> {
        if is_cancelled(cancellation) {
            return Err(CompletionApiError::Cancelled);
        }

        let pending = self.build_request(request)?.send();
        let response = await_or_cancel(pending, cancellation).await??;
        let status = response.status();
        if status.is_success() {
            debug!("completion request accepted with HTTP {status}");
            return Ok(response);
        }

        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .unwrap_or_default();
        let message = parse_error_message(status, &body);
        warn!("completion request rejected with HTTP {status}: {message}");
        Err(CompletionApiError::Status(status, message))
    }

    /// Send a request and hand back its body as a record stream.
    pub async fn open_stream(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<RecordStream, CompletionApiError> {
        let response = self.send(request, cancellation).await?;
        Ok(RecordStream::from_response(response))
    }

    /// Read a whole stream into memory.
    #[doc(hidden)]
    pub async fn collect(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, CompletionApiError> {
        let mut stream = self.open_stream(request, cancellation).await?;
        let mut records = Vec::new();
        while let Some(record) = stream.next_record(cancellation).await? {
            records.push(record);
        }

        Ok(StreamResult {
            http_status: stream.http_status(),
            records,
        })
    }
}

/// Newline-delimited records read lazily from a response body.
///
/// Dropping the stream drops the underlying response, which releases the
/// connection.
pub struct RecordStream {
    http_status: u16,
    chunks: ChunkStream,
    splitter: RecordSplitter,
    pending: VecDeque<Vec<u8>>,
    exhausted: bool,
}

impl fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("http_status", &self.http_status)
            .field("pending", &self.pending.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl RecordStream {
    pub fn new(http_status: u16, chunks: ChunkStream) -> Self {
        Self {
            http_status,
            chunks,
            splitter: RecordSplitter::default(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn from_response(response: Response) -> Self {
        let http_status = response.status().as_u16();
        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(CompletionApiError::from)
            })
            .boxed();
        Self::new(http_status, chunks)
    }

    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    /// Next complete record, or `None` once the body has ended.
    ///
    /// This is the only suspension point of a stream: it awaits the next
    /// transport chunk when no buffered record is left.
    pub async fn next_record(
        &mut self,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Option<Vec<u8>>, CompletionApiError> {
        loop {
            if is_cancelled(cancellation) {
                return Err(CompletionApiError::Cancelled);
            }
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            if self.exhausted {
                return Ok(None);
            }

            match await_or_cancel(self.chunks.next(), cancellation).await? {
                Some(chunk) => {
                    let chunk = chunk?;
                    self.pending.extend(self.splitter.feed(&chunk));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.splitter.finish());
                }
            }
        }
    }
}

fn request_with_transport_defaults(request: &ChatRequest) -> ChatRequest {
    let mut payload = request.clone();
    payload.stream = true;
    payload.n = 1;
    payload.presence_penalty = 0.0;
    payload.frequency_penalty = 0.0;
    payload
}

fn validate_request_payload_shape(request: &ChatRequest) -> Result<(), CompletionApiError> {
    if request.model.trim().is_empty() {
        return Err(CompletionApiError::InvalidRequestPayload(
            "'model' must not be empty".to_string(),
        ));
    }

    match request.messages.first() {
        Some(first) if first.role == ChatRole::User => Ok(()),
        Some(first) => Err(CompletionApiError::InvalidRequestPayload(format!(
            "'messages' must start with a user message, got {}",
            first.role.as_str()
        ))),
        None => Err(CompletionApiError::InvalidRequestPayload(
            "'messages' must not be empty".to_string(),
        )),
    }
}

pub fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, CompletionApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(CompletionApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(CompletionApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
