//! Environment configuration.

use std::env;
use std::fmt;
use std::time::Duration;

use completion_api::CompletionApiConfig;

use crate::admission::AdmissionLimits;

pub const ENV_API_URL: &str = "API_URL";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_DISABLED: &str = "DISABLED";
pub const ENV_MODEL: &str = "MODEL";
pub const ENV_TIMEOUT_SECS: &str = "STREAMCHAT_TIMEOUT_SECS";
pub const ENV_MAX_ACTIVE_STREAMS: &str = "STREAMCHAT_MAX_ACTIVE_STREAMS";
pub const ENV_MAX_QUEUED_STREAMS: &str = "STREAMCHAT_MAX_QUEUED_STREAMS";

pub const DEFAULT_MODEL: &str = "gpt-4";

/// Per-session settings, fixed at construction.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// When set, new turns are refused while the transcript stays readable.
    pub disabled: bool,
    pub timeout: Option<Duration>,
    pub admission: AdmissionLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            disabled: false,
            timeout: None,
            admission: AdmissionLimits::default(),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("disabled", &self.disabled)
            .field("timeout", &self.timeout)
            .field("admission", &self.admission)
            .finish()
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = AdmissionLimits::default();
        Self {
            endpoint: env_string_opt(ENV_API_URL).unwrap_or_default(),
            api_key: env_string_opt(ENV_API_KEY).unwrap_or_default(),
            model: env_string_opt(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            disabled: env_flag(ENV_DISABLED),
            timeout: env_parse::<u64>(ENV_TIMEOUT_SECS)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            admission: AdmissionLimits {
                max_active: env_parse(ENV_MAX_ACTIVE_STREAMS).unwrap_or(defaults.max_active),
                max_queued: env_parse(ENV_MAX_QUEUED_STREAMS).unwrap_or(defaults.max_queued),
            },
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_admission(mut self, admission: AdmissionLimits) -> Self {
        self.admission = admission;
        self
    }

    /// Transport settings derived from this session configuration.
    pub fn api_config(&self) -> CompletionApiConfig {
        let mut config = CompletionApiConfig::new(self.api_key.clone()).with_endpoint(&self.endpoint);
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        config
    }
}

/// `True` is the spelling deployments have always used; `1`, `true` and
/// `yes` are accepted as well.
fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}
