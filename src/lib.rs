//! Streaming chat-completion sessions.
//!
//! Invariant: a session's transcript has a single writer, the exchange
//! currently holding its active slot.
//!
//! # Public API Overview
//! - Keep the conversation in a [`Transcript`] of alternating user and
//!   assistant turns.
//! - Open a [`Session`] from [`SessionConfig`] and [`Session::submit`] user
//!   text; the returned [`Exchange`] yields [`ExchangeUpdate`] snapshots while
//!   the reply streams in.
//! - Render turns for display with [`render`] / [`Markup`].
//! - Bound concurrent streams across sessions with [`AdmissionControl`].

pub mod admission;
pub mod config;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod markup;
pub mod session;
pub mod transcript;

/// Stream admission limits.
pub use crate::admission::{AdmissionControl, AdmissionLimits};
/// Environment-backed session configuration.
pub use crate::config::SessionConfig;
/// Error taxonomy.
pub use crate::error::ChatError;
/// Request construction, stream folding and exchange snapshots.
pub use crate::exchange::{
    CompletionTransport, ExchangeState, ExchangeStatus, ExchangeUpdate, RequestContext,
    SamplingParams, StreamStats,
};
/// Failure reporting.
pub use crate::logging::{ErrorReporter, LogReporter};
/// Display markup.
pub use crate::markup::{render, render_pairs, Markup};
/// Sessions and running exchanges.
pub use crate::session::{Exchange, Session};
/// Conversation log.
pub use crate::transcript::{Role, Transcript, Turn};

/// Wire-level client, re-exported for hosts that supply their own transport.
pub use completion_api;
