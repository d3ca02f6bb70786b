use clap::Parser;
use streamchat::exchange::{MAX_TEMPERATURE, MAX_TOP_P};
use streamchat::{SamplingParams, SessionConfig};

pub const ENV_LOG: &str = "STREAMCHAT_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Chat with a streamed completion endpoint from the terminal.
///
/// Connection settings come from `API_URL`, `OPENAI_API_KEY`, `MODEL` and
/// `DISABLED`. `--model` and `--api-url` read the same variables, and an
/// explicit flag wins over either.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "streamchat", version)]
pub struct Cli {
    /// Top-p (nucleus sampling), 0 to 1. Ignored on the first turn.
    #[arg(long, default_value_t = 1.0, value_parser = parse_top_p)]
    pub top_p: f64,

    /// Temperature, 0 to 5. Ignored on the first turn.
    #[arg(long, default_value_t = 1.0, value_parser = parse_temperature)]
    pub temperature: f64,

    /// Print each finished reply as display markup instead of plain text.
    #[arg(long)]
    pub markup: bool,

    /// Model id sent with every request.
    #[arg(long, env = "MODEL")]
    pub model: Option<String>,

    /// Completion endpoint.
    #[arg(long, value_name = "URL", env = "API_URL")]
    pub api_url: Option<String>,
}

impl Cli {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams::new(self.top_p, self.temperature)
    }

    /// Apply flag overrides on top of the environment configuration.
    pub fn session_config(&self, mut config: SessionConfig) -> SessionConfig {
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(api_url) = &self.api_url {
            config = config.with_endpoint(api_url.clone());
        }
        config
    }
}

fn parse_top_p(value: &str) -> Result<f64, String> {
    parse_in_range(value, MAX_TOP_P)
}

fn parse_temperature(value: &str) -> Result<f64, String> {
    parse_in_range(value, MAX_TEMPERATURE)
}

fn parse_in_range(value: &str, max: f64) -> Result<f64, String> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if !(0.0..=max).contains(&parsed) {
        return Err(format!("{parsed} is outside 0..={max}"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    use clap::Parser;
    use streamchat::config::{ENV_API_URL, ENV_MODEL};
    use streamchat::SessionConfig;

    use super::Cli;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn defaults_match_the_sliders() {
        let cli = Cli::try_parse_from(["streamchat"]).expect("parse");
        assert_eq!(cli.top_p, 1.0);
        assert_eq!(cli.temperature, 1.0);
        assert!(!cli.markup);
    }

    #[test]
    fn sampling_flags_are_range_checked() {
        let cli = Cli::try_parse_from(["streamchat", "--top-p", "0.5", "--temperature", "4.5"])
            .expect("parse");
        assert_eq!(cli.top_p, 0.5);
        assert_eq!(cli.temperature, 4.5);

        assert!(Cli::try_parse_from(["streamchat", "--top-p", "1.5"]).is_err());
        assert!(Cli::try_parse_from(["streamchat", "--temperature", "6"]).is_err());
        assert!(Cli::try_parse_from(["streamchat", "--temperature", "warm"]).is_err());
    }

    #[test]
    fn flags_override_environment_config() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_MODEL, Some("gpt-3.5-turbo"));
        let _g2 = set_env_guard(ENV_API_URL, Some("https://relay.test/v1"));
        let cli = Cli::try_parse_from([
            "streamchat",
            "--model",
            "gpt-4o",
            "--api-url",
            "http://localhost:8080/v1",
        ])
        .expect("parse");

        let config = cli.session_config(SessionConfig::default().with_model("gpt-4"));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.endpoint, "http://localhost:8080/v1");
    }

    #[test]
    fn model_and_endpoint_fall_back_to_environment() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_MODEL, Some("gpt-4o-mini"));
        let _g2 = set_env_guard(ENV_API_URL, Some("https://relay.test/v1"));

        let cli = Cli::try_parse_from(["streamchat"]).expect("parse");
        assert_eq!(cli.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cli.api_url.as_deref(), Some("https://relay.test/v1"));

        let config = cli.session_config(SessionConfig::default());
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.endpoint, "https://relay.test/v1");
    }

    #[test]
    fn unset_environment_leaves_flags_empty() {
        let _lock = env_lock();
        let _g1 = set_env_guard(ENV_MODEL, None);
        let _g2 = set_env_guard(ENV_API_URL, None);

        let cli = Cli::try_parse_from(["streamchat"]).expect("parse");
        assert_eq!(cli.model, None);
        assert_eq!(cli.api_url, None);
    }
}
