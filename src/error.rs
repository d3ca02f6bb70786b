use completion_api::CompletionApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("cannot {operation}: {expected} (transcript length {len})")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        len: usize,
    },

    #[error("transport failure: {0}")]
    Transport(#[from] CompletionApiError),

    #[error("sampling parameters must be finite (top_p {top_p}, temperature {temperature})")]
    InvalidSampling { top_p: f64, temperature: f64 },

    #[error("the chat service is disabled")]
    ServiceDisabled,

    #[error("an exchange is already in flight for this session")]
    ExchangeActive,

    #[error("stream limit reached ({queued} requests already waiting), please try again later")]
    LimitReached { queued: usize },

    #[error("exchange runtime failure: {0}")]
    Runtime(String),
}

impl ChatError {
    #[must_use]
    pub fn invalid_state(operation: &'static str, expected: &'static str, len: usize) -> Self {
        Self::InvalidState {
            operation,
            expected,
            len,
        }
    }

    /// True when the error ended an in-flight stream rather than being
    /// rejected up front.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
