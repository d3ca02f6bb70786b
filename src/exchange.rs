//! One request/response exchange: request construction and stream folding.
//!
//! A stream is folded into the transcript record by record. The first record
//! is always discarded (it only announces the stream), every later fragment
//! is appended to a running total, and the trailing assistant turn is
//! overwritten with that total. Undecodable records are counted and skipped;
//! only transport failures end a stream early.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use completion_api::{
    decode_record, CancellationSignal, ChatMessage, ChatRequest, CompletionApiError,
    CompletionClient, RecordError, RecordStream, StreamRecord,
};
use futures_util::future::BoxFuture;
use log::{debug, trace, warn};
use serde::Serialize;

use crate::error::ChatError;
use crate::markup::render_pairs;
use crate::transcript::{Transcript, Turn};

/// Upper bounds of the sampling controls front-ends offer. Requests carry
/// whatever the caller chose; range checks belong to the input surface.
pub const MAX_TOP_P: f64 = 1.0;
pub const MAX_TEMPERATURE: f64 = 5.0;

/// Sampling controls forwarded to the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub top_p: f64,
    pub temperature: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            top_p: 1.0,
            temperature: 1.0,
        }
    }
}

impl SamplingParams {
    pub fn new(top_p: f64, temperature: f64) -> Self {
        Self { top_p, temperature }
    }

    /// Non-finite values have no JSON form and are refused; everything else
    /// is sent as given.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.top_p.is_finite() && self.temperature.is_finite() {
            Ok(())
        } else {
            Err(ChatError::InvalidSampling {
                top_p: self.top_p,
                temperature: self.temperature,
            })
        }
    }
}

/// Per-exchange request state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestContext {
    /// Zero for the first exchange of a session.
    pub turn_counter: u64,
    pub sampling: SamplingParams,
}

impl RequestContext {
    pub fn new(turn_counter: u64, sampling: SamplingParams) -> Self {
        Self {
            turn_counter,
            sampling,
        }
    }

    pub fn is_first_exchange(&self) -> bool {
        self.turn_counter == 0
    }

    /// Sampling actually sent. The first exchange always uses 1.0 / 1.0
    /// whatever the caller asked for; later exchanges use the caller's values.
    pub fn effective_sampling(&self) -> SamplingParams {
        if self.is_first_exchange() {
            SamplingParams::default()
        } else {
            self.sampling
        }
    }

    /// Build the request for the pending user turn at the end of `transcript`.
    ///
    /// The first exchange sends only that turn; later exchanges send the
    /// whole history.
    pub fn build_request(
        &self,
        model: &str,
        transcript: &Transcript,
    ) -> Result<ChatRequest, ChatError> {
        let Some(pending) = transcript.last().filter(|_| transcript.is_awaiting_assistant())
        else {
            return Err(ChatError::invalid_state(
                "build a request",
                "the last turn must be a pending user turn",
                transcript.len(),
            ));
        };

        let messages = if self.is_first_exchange() {
            vec![ChatMessage::user(pending.text())]
        } else {
            transcript.to_messages()
        };
        let sampling = self.effective_sampling();

        Ok(ChatRequest::new(model, messages).with_sampling(sampling.top_p, sampling.temperature))
    }
}

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    Idle,
    RequestSent,
    Streaming,
    FragmentReceived,
    Completed,
    Failed,
}

impl ExchangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status shown next to the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Waiting for a free stream slot.
    Queued,
    /// Request sent, no response yet.
    Connecting,
    Streaming { http_status: u16 },
    Completed { http_status: u16 },
    Failed { message: String },
    Cancelled,
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming { http_status } => write!(f, "HTTP {http_status} streaming"),
            Self::Completed { http_status } => write!(f, "HTTP {http_status} completed"),
            Self::Failed { message } => write!(f, "failed: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Record accounting for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub records: u64,
    pub fragments: u64,
    /// Records skipped because they could not be decoded into a fragment.
    pub skipped_records: u64,
    /// Subset of `skipped_records` that looked like protocol damage rather
    /// than expected content-less events.
    pub malformed_records: u64,
}

/// Snapshot handed to the UI after every transcript change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeUpdate {
    /// Rendered `(user, assistant)` markup pairs.
    pub pairs: Vec<(String, String)>,
    pub transcript: Vec<Turn>,
    pub turn_counter: u64,
    pub status: ExchangeStatus,
    /// False while the stream is running; always true on the final update.
    pub input_enabled: bool,
    pub stats: StreamStats,
}

impl ExchangeUpdate {
    pub fn snapshot(
        transcript: &Transcript,
        turn_counter: u64,
        status: ExchangeStatus,
        stats: StreamStats,
    ) -> Self {
        Self {
            pairs: render_pairs(transcript.as_pairs()),
            transcript: transcript.turns().to_vec(),
            turn_counter,
            input_enabled: status.is_terminal(),
            status,
            stats,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raw text of the trailing assistant turn, if one exists yet.
    pub fn assistant_text(&self) -> Option<&str> {
        self.transcript
            .last()
            .filter(|turn| turn.role() == crate::transcript::Role::Assistant)
            .map(Turn::text)
    }
}

/// What one record did to the transcript.
#[derive(Debug)]
pub enum FoldStep {
    /// The stream-open record, discarded unread.
    OpenSignal,
    Blank,
    Fragment,
    Done,
    Skipped(RecordError),
}

/// Folds decoded fragments into the trailing assistant turn.
#[derive(Debug, Default)]
pub struct StreamFold {
    cumulative: String,
    stats: StreamStats,
}

impl StreamFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        record: &[u8],
        transcript: &mut Transcript,
    ) -> Result<FoldStep, ChatError> {
        let index = self.stats.records;
        self.stats.records += 1;
        if index == 0 {
            trace!("discarding stream-open record");
            return Ok(FoldStep::OpenSignal);
        }

        match decode_record(record) {
            Ok(StreamRecord::Blank) => Ok(FoldStep::Blank),
            Ok(StreamRecord::Done) => Ok(FoldStep::Done),
            Ok(StreamRecord::Delta(fragment)) => {
                if self.stats.fragments == 0 {
                    transcript.begin_assistant()?;
                }
                self.cumulative.push_str(&fragment);
                transcript.update_assistant(self.cumulative.as_str())?;
                self.stats.fragments += 1;
                Ok(FoldStep::Fragment)
            }
            Err(error) => {
                self.stats.skipped_records += 1;
                if error.is_malformed() {
                    self.stats.malformed_records += 1;
                    warn!("skipping malformed stream record {index}: {error}");
                } else {
                    debug!("skipping stream record {index}: {error}");
                }
                Ok(FoldStep::Skipped(error))
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.cumulative
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

/// Source of record streams. [`CompletionClient`] is the production
/// implementation; tests script their own.
pub trait CompletionTransport: Send + Sync + 'static {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancellation: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<RecordStream, CompletionApiError>>;
}

impl CompletionTransport for CompletionClient {
    fn open<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancellation: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<RecordStream, CompletionApiError>> {
        Box::pin(self.open_stream(request, Some(cancellation)))
    }
}

/// Result of driving one stream.
#[derive(Debug)]
pub struct StreamOutcome {
    pub state: ExchangeState,
    pub status: ExchangeStatus,
    pub stats: StreamStats,
    pub error: Option<ChatError>,
}

impl StreamOutcome {
    /// Outcome for an exchange that never reached the stream.
    pub fn from_status(status: ExchangeStatus, error: Option<ChatError>) -> Self {
        let state = match status {
            ExchangeStatus::Completed { .. } => ExchangeState::Completed,
            _ => ExchangeState::Failed,
        };
        Self {
            state,
            status,
            stats: StreamStats::default(),
            error,
        }
    }

    fn failed(fold: &StreamFold, error: ChatError) -> Self {
        Self {
            state: ExchangeState::Failed,
            status: ExchangeStatus::Failed {
                message: error.to_string(),
            },
            stats: fold.stats(),
            error: Some(error),
        }
    }

    fn cancelled(fold: &StreamFold) -> Self {
        Self {
            state: ExchangeState::Failed,
            status: ExchangeStatus::Cancelled,
            stats: fold.stats(),
            error: None,
        }
    }
}

/// Send `request` and fold its stream into `transcript`.
///
/// `publish` receives the transcript after the response opens and after
/// every fragment; it returns `false` once nobody is listening, which stops
/// the stream. The final snapshot is left to the caller.
pub async fn stream_into<P>(
    transport: &dyn CompletionTransport,
    request: &ChatRequest,
    transcript: &Mutex<Transcript>,
    cancellation: &CancellationSignal,
    mut publish: P,
) -> StreamOutcome
where
    P: FnMut(&Transcript, ExchangeStatus, StreamStats) -> bool,
{
    let mut fold = StreamFold::new();
    let mut state = ExchangeState::Idle;
    trace!("exchange state {state:?}");

    state = ExchangeState::RequestSent;
    trace!("exchange state {state:?}");
    let mut records = match transport.open(request, cancellation).await {
        Ok(records) => records,
        Err(CompletionApiError::Cancelled) => return StreamOutcome::cancelled(&fold),
        Err(error) => return StreamOutcome::failed(&fold, error.into()),
    };

    let http_status = records.http_status();
    state = ExchangeState::Streaming;
    trace!("exchange state {state:?}");
    let listening = publish(
        &lock_unpoisoned(transcript),
        ExchangeStatus::Streaming { http_status },
        fold.stats(),
    );
    if !listening {
        return StreamOutcome::cancelled(&fold);
    }

    loop {
        let record = match records.next_record(Some(cancellation)).await {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(CompletionApiError::Cancelled) => return StreamOutcome::cancelled(&fold),
            Err(error) => return StreamOutcome::failed(&fold, error.into()),
        };

        let mut guard = lock_unpoisoned(transcript);
        match fold.apply(&record, &mut guard) {
            Ok(FoldStep::Fragment) => {
                state = ExchangeState::FragmentReceived;
                trace!("exchange state {state:?} after {} fragments", fold.stats().fragments);
                let status = ExchangeStatus::Streaming { http_status };
                if !publish(&guard, status, fold.stats()) {
                    return StreamOutcome::cancelled(&fold);
                }
                state = ExchangeState::Streaming;
            }
            Ok(FoldStep::Done) => break,
            Ok(FoldStep::OpenSignal | FoldStep::Blank | FoldStep::Skipped(_)) => {}
            Err(error) => return StreamOutcome::failed(&fold, error),
        }
    }

    debug_assert!(!state.is_terminal());
    state = ExchangeState::Completed;
    trace!("exchange state {state:?}");
    StreamOutcome {
        state,
        status: ExchangeStatus::Completed { http_status },
        stats: fold.stats(),
        error: None,
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
