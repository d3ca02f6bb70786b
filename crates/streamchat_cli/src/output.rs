use streamchat::{ExchangeStatus, ExchangeUpdate};

pub const DISABLED_BANNER: &str = "This app has reached OpenAI's usage limit. \
We are currently requesting an increase in our quota. Please check back in a few days.";

/// Turns cumulative assistant snapshots into the suffix not yet printed.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    printed: String,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text to print for `update`. When a snapshot does not extend what was
    /// already printed, the whole reply is returned on a fresh line.
    pub fn delta(&mut self, update: &ExchangeUpdate) -> Option<String> {
        let text = update.assistant_text()?;
        if text == self.printed {
            return None;
        }

        let delta = match text.strip_prefix(self.printed.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{text}"),
        };
        self.printed.clear();
        self.printed.push_str(text);
        Some(delta)
    }

    pub fn printed(&self) -> &str {
        &self.printed
    }
}

/// Status line shown after a reply, or while waiting.
pub fn status_line(update: &ExchangeUpdate) -> String {
    match &update.status {
        ExchangeStatus::Completed { .. } if update.stats.skipped_records > 0 => format!(
            "[{} | {} fragments, {} records skipped]",
            update.status, update.stats.fragments, update.stats.skipped_records
        ),
        ExchangeStatus::Completed { .. } => {
            format!("[{} | {} fragments]", update.status, update.stats.fragments)
        }
        status => format!("[{status}]"),
    }
}

/// The latest pair as display markup.
pub fn markup_reply(update: &ExchangeUpdate) -> Option<&str> {
    update.pairs.last().map(|(_, assistant)| assistant.as_str())
}
