//! Session orchestration: one transcript, one exchange at a time.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use completion_api::{CancellationSignal, ChatRequest, CompletionClient};
use futures_util::FutureExt;
use log::{debug, info};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::admission::{AdmissionControl, AdmissionTicket, Admitted};
use crate::config::SessionConfig;
use crate::error::ChatError;
use crate::exchange::{
    lock_unpoisoned, stream_into, CompletionTransport, ExchangeStatus, ExchangeUpdate,
    RequestContext, SamplingParams, StreamOutcome, StreamStats,
};
use crate::logging::{default_reporter, log_request_payload, ErrorReporter, ExchangeSummary};
use crate::markup::render_pairs;
use crate::transcript::Transcript;

const ADMISSION_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One conversation.
///
/// The transcript is shared with the running exchange task behind a mutex;
/// the active slot keeps that task the only writer.
pub struct Session {
    id: String,
    config: SessionConfig,
    transport: Arc<dyn CompletionTransport>,
    admission: AdmissionControl,
    reporter: Arc<dyn ErrorReporter>,
    transcript: Arc<Mutex<Transcript>>,
    turn_counter: AtomicU64,
    active: Arc<AtomicBool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("turn_counter", &self.turn_counter())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session backed by the HTTP completion client, with its own admission
    /// limits.
    pub fn new(config: SessionConfig) -> Result<Self, ChatError> {
        let client = CompletionClient::new(config.api_config())?;
        let admission = AdmissionControl::new(config.admission);
        Ok(Self::with_transport(config, Arc::new(client), admission))
    }

    /// Session over an arbitrary transport. Pass the same `admission` to
    /// every session that should share stream limits.
    pub fn with_transport(
        config: SessionConfig,
        transport: Arc<dyn CompletionTransport>,
        admission: AdmissionControl,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            transport,
            admission,
            reporter: default_reporter(),
            transcript: Arc::new(Mutex::new(Transcript::new())),
            turn_counter: AtomicU64::new(0),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_disabled(&self) -> bool {
        self.config.disabled
    }

    /// True while an exchange is in flight.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn turn_counter(&self) -> u64 {
        self.turn_counter.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Transcript {
        lock_unpoisoned(&self.transcript).clone()
    }

    /// Rendered `(user, assistant)` pairs of the current transcript.
    pub fn pairs(&self) -> Vec<(String, String)> {
        render_pairs(lock_unpoisoned(&self.transcript).as_pairs())
    }

    /// Append `text` as a user turn and start streaming the reply.
    ///
    /// Must be called from inside a tokio runtime. The returned handle yields
    /// snapshots until a final one with input re-enabled.
    pub fn submit(
        &self,
        text: impl Into<String>,
        sampling: SamplingParams,
    ) -> Result<Exchange, ChatError> {
        let runtime = Handle::try_current()
            .map_err(|error| ChatError::Runtime(format!("no tokio runtime: {error}")))?;
        if self.config.disabled {
            return Err(ChatError::ServiceDisabled);
        }
        sampling.validate()?;
        let active = ActiveSlot::claim(&self.active)?;
        let ticket = self.admission.reserve()?;

        let turn_counter = self.turn_counter();
        let context = RequestContext::new(turn_counter, sampling);
        let (request, initial) = {
            let mut transcript = lock_unpoisoned(&self.transcript);
            transcript.append_user(text)?;
            let request = context.build_request(&self.config.model, &transcript)?;
            let status = if ticket.is_queued() {
                ExchangeStatus::Queued
            } else {
                ExchangeStatus::Connecting
            };
            let initial = ExchangeUpdate::snapshot(
                &transcript,
                turn_counter + 1,
                status,
                StreamStats::default(),
            );
            (request, initial)
        };
        self.turn_counter.fetch_add(1, Ordering::AcqRel);
        log_request_payload(&self.id, &request);

        let (updates, receiver) = watch::channel(initial);
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
        let job = ExchangeJob {
            session_id: self.id.clone(),
            model: self.config.model.clone(),
            sampling: context.effective_sampling(),
            turn_counter: turn_counter + 1,
            transport: Arc::clone(&self.transport),
            reporter: Arc::clone(&self.reporter),
            transcript: Arc::clone(&self.transcript),
            request,
            ticket,
            cancel: Arc::clone(&cancel),
            updates,
            active,
        };
        let task = runtime.spawn(job.run());

        Ok(Exchange {
            updates: receiver,
            cancel,
            task: Some(task),
            delivered_initial: false,
            finished: false,
        })
    }
}

/// Marks the session busy until dropped.
struct ActiveSlot {
    flag: Arc<AtomicBool>,
}

impl ActiveSlot {
    fn claim(flag: &Arc<AtomicBool>) -> Result<Self, ChatError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ChatError::ExchangeActive)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct ExchangeJob {
    session_id: String,
    model: String,
    sampling: SamplingParams,
    turn_counter: u64,
    transport: Arc<dyn CompletionTransport>,
    reporter: Arc<dyn ErrorReporter>,
    transcript: Arc<Mutex<Transcript>>,
    request: ChatRequest,
    ticket: AdmissionTicket,
    cancel: CancellationSignal,
    updates: watch::Sender<ExchangeUpdate>,
    active: ActiveSlot,
}

impl ExchangeJob {
    async fn run(self) {
        let Self {
            session_id,
            model,
            sampling,
            turn_counter,
            transport,
            reporter,
            transcript,
            request,
            ticket,
            cancel,
            updates,
            active,
        } = self;

        let streamed = AssertUnwindSafe(async {
            let admission =
                admit_or_cancel(ticket, &cancel, &transcript, turn_counter, &updates).await;
            let admitted = match admission {
                Ok(Some(admitted)) => admitted,
                Ok(None) => {
                    return (
                        None,
                        StreamOutcome::from_status(ExchangeStatus::Cancelled, None),
                    )
                }
                Err(error) => {
                    let status = ExchangeStatus::Failed {
                        message: error.to_string(),
                    };
                    return (None, StreamOutcome::from_status(status, Some(error)));
                }
            };

            let outcome = stream_into(
                transport.as_ref(),
                &request,
                &transcript,
                &cancel,
                |current, status, stats| {
                    updates
                        .send(ExchangeUpdate::snapshot(current, turn_counter, status, stats))
                        .is_ok()
                },
            )
            .await;
            (Some(admitted), outcome)
        })
        .catch_unwind()
        .await;

        let outcome = match streamed {
            Ok((admitted, outcome)) => {
                drop(admitted);
                outcome
            }
            Err(_) => {
                let error = ChatError::Runtime("exchange task panicked".to_string());
                let status = ExchangeStatus::Failed {
                    message: error.to_string(),
                };
                StreamOutcome::from_status(status, Some(error))
            }
        };

        if let Some(error) = &outcome.error {
            reporter.report(&session_id, error);
        }

        let final_update = {
            let mut transcript = lock_unpoisoned(&transcript);
            if transcript.is_awaiting_assistant() {
                debug!("session {session_id}: closing turn without assistant text");
                if let Err(error) = transcript.begin_assistant() {
                    reporter.report(&session_id, &error);
                }
            }
            ExchangeSummary {
                session_id: &session_id,
                model: &model,
                turn_counter,
                sampling,
                status: &outcome.status,
                stats: outcome.stats,
                transcript_len: transcript.len(),
            }
            .log();
            ExchangeUpdate::snapshot(&transcript, turn_counter, outcome.status, outcome.stats)
        };

        drop(active);
        if updates.send(final_update).is_err() {
            info!("session {session_id}: exchange finished with nobody listening");
        }
    }
}

/// Wait for an active stream slot. `Ok(None)` when cancelled first.
async fn admit_or_cancel(
    ticket: AdmissionTicket,
    cancel: &CancellationSignal,
    transcript: &Mutex<Transcript>,
    turn_counter: u64,
    updates: &watch::Sender<ExchangeUpdate>,
) -> Result<Option<Admitted>, ChatError> {
    if !ticket.is_queued() {
        return ticket.admit().await.map(Some);
    }

    let mut admit = Box::pin(ticket.admit());
    loop {
        if cancel.load(Ordering::Acquire) {
            return Ok(None);
        }
        if let Ok(admitted) = tokio::time::timeout(ADMISSION_POLL_INTERVAL, &mut admit).await {
            let admitted = admitted?;
            let connecting = ExchangeUpdate::snapshot(
                &lock_unpoisoned(transcript),
                turn_counter,
                ExchangeStatus::Connecting,
                StreamStats::default(),
            );
            if updates.send(connecting).is_err() {
                return Ok(None);
            }
            return Ok(Some(admitted));
        }
    }
}

/// Handle to a running exchange.
///
/// Dropping the handle cancels the exchange; partial text already streamed
/// stays in the transcript.
#[derive(Debug)]
pub struct Exchange {
    updates: watch::Receiver<ExchangeUpdate>,
    cancel: CancellationSignal,
    task: Option<JoinHandle<()>>,
    delivered_initial: bool,
    finished: bool,
}

impl Exchange {
    /// Receiver that always holds the latest snapshot.
    pub fn updates(&self) -> watch::Receiver<ExchangeUpdate> {
        self.updates.clone()
    }

    pub fn latest(&self) -> ExchangeUpdate {
        self.updates.borrow().clone()
    }

    /// Next unseen snapshot, starting with the one taken at submit time.
    /// Intermediate snapshots may be coalesced; the final one never is.
    /// Returns `None` after the final snapshot.
    pub async fn next_update(&mut self) -> Option<ExchangeUpdate> {
        if self.finished {
            return None;
        }
        if !self.delivered_initial {
            self.delivered_initial = true;
            return Some(self.observe());
        }
        match self.updates.changed().await {
            Ok(()) => Some(self.observe()),
            Err(_) => {
                self.finished = true;
                None
            }
        }
    }

    fn observe(&mut self) -> ExchangeUpdate {
        let update = self.updates.borrow_and_update().clone();
        if update.is_final() {
            self.finished = true;
        }
        update
    }

    /// Drive to completion and return the final snapshot.
    pub async fn finish(mut self) -> ExchangeUpdate {
        let mut last = self.latest();
        while let Some(update) = self.next_update().await {
            last = update;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        last
    }

    /// Ask the exchange to stop. The final snapshot reports `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel();
        }
    }
}
