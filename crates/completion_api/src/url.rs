/// Default chat-completions endpoint.
pub const DEFAULT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalize a configured URL to a chat-completions endpoint.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_COMPLETIONS_URL`]
/// 2) keep `/chat/completions` unchanged
/// 3) append `/chat/completions` when the path ends in `/v1`
/// 4) use anything else verbatim (proxies with custom paths)
pub fn normalize_completions_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DEFAULT_COMPLETIONS_URL.to_string();
    }

    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.ends_with(COMPLETIONS_PATH) {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/v1") {
        return format!("{trimmed}{COMPLETIONS_PATH}");
    }
    trimmed.to_string()
}
