use std::collections::BTreeMap;

use crate::config::CompletionApiConfig;
use crate::error::CompletionApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_USER_AGENT: &str = "user-agent";

pub const DEFAULT_USER_AGENT: &str = concat!("streamchat/", env!("CARGO_PKG_VERSION"));

/// Build a deterministic header map for chat-completion requests.
///
/// Extra headers are applied first so the authorization and content headers
/// always carry the configured values.
pub fn build_headers(
    config: &CompletionApiConfig,
    user_agent: Option<&str>,
) -> Result<BTreeMap<String, String>, CompletionApiError> {
    if config.api_key.trim().is_empty() {
        return Err(CompletionApiError::MissingApiKey);
    }

    let mut headers = BTreeMap::new();
    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    headers.insert(
        HEADER_AUTHORIZATION.to_owned(),
        format!("Bearer {}", config.api_key.trim()),
    );
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );
    headers.insert(HEADER_ACCEPT.to_owned(), "text/event-stream".to_owned());

    let ua = match (user_agent, config.user_agent.as_deref()) {
        (Some(explicit), _) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        (None, Some(explicit)) if !explicit.trim().is_empty() => explicit.trim().to_owned(),
        _ => DEFAULT_USER_AGENT.to_owned(),
    };
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    Ok(headers)
}
