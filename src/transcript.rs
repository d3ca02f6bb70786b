//! Append-only conversation log.
//!
//! Invariant: turns strictly alternate starting with a user turn, so index
//! `2i` is always a user turn and `2i + 1` an assistant turn. Only the
//! trailing assistant turn is ever rewritten, and nothing is ever removed.

use std::iter::FusedIterator;
use std::slice::ChunksExact;

use completion_api::ChatMessage;
pub use completion_api::ChatRole as Role;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// One utterance attributed to a user or the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// True while a user turn is waiting for its assistant reply.
    #[must_use]
    pub fn is_awaiting_assistant(&self) -> bool {
        self.last().is_some_and(|turn| turn.role == Role::User)
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Result<(), ChatError> {
        if self.turns.len() % 2 != 0 {
            return Err(ChatError::invalid_state(
                "append a user turn",
                "the previous assistant turn is still pending",
                self.turns.len(),
            ));
        }

        self.turns.push(Turn {
            role: Role::User,
            text: text.into(),
        });
        Ok(())
    }

    pub fn begin_assistant(&mut self) -> Result<(), ChatError> {
        if !self.is_awaiting_assistant() {
            return Err(ChatError::invalid_state(
                "begin an assistant turn",
                "the last turn must be a user turn",
                self.turns.len(),
            ));
        }

        self.turns.push(Turn {
            role: Role::Assistant,
            text: String::new(),
        });
        Ok(())
    }

    /// Overwrite the trailing assistant turn with the cumulative text.
    pub fn update_assistant(&mut self, text: impl Into<String>) -> Result<(), ChatError> {
        let len = self.turns.len();
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => {
                turn.text = text.into();
                Ok(())
            }
            _ => Err(ChatError::invalid_state(
                "update the assistant turn",
                "the last turn must be an assistant turn",
                len,
            )),
        }
    }

    /// Lazily pair each user turn with its assistant reply.
    ///
    /// A trailing user turn without a reply yet is not yielded.
    #[must_use]
    pub fn as_pairs(&self) -> Pairs<'_> {
        Pairs {
            chunks: self.turns.chunks_exact(2),
        }
    }

    /// Wire history for a follow-up request.
    #[must_use]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role,
                content: turn.text.clone(),
            })
            .collect()
    }
}

/// Iterator over `(user_text, assistant_text)` pairs.
#[derive(Debug, Clone)]
pub struct Pairs<'a> {
    chunks: ChunksExact<'a, Turn>,
}

impl<'a> Iterator for Pairs<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.chunks.next()?;
        Some((pair[0].text.as_str(), pair[1].text.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Pairs<'_> {}

impl FusedIterator for Pairs<'_> {}
