use serde::{Deserialize, Serialize};

/// Speaker attribution for one wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Canonical request payload for a streamed chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    /// Default: 1.
    #[serde(default = "default_candidates")]
    pub n: u32,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
}

fn default_true() -> bool {
    true
}

fn default_candidates() -> u32 {
    1
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 1.0,
            top_p: 1.0,
            n: 1,
            stream: true,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
        }
    }

    pub fn with_sampling(mut self, top_p: f64, temperature: f64) -> Self {
        self.top_p = top_p;
        self.temperature = temperature;
        self
    }
}
