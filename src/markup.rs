//! Display markup for transcript text.
//!
//! Rendering is a pure projection: it is recomputed for every re-render and
//! never written back into the transcript. The escaping is intentionally
//! narrow (only `<` and `>`), and the first line of a turn is passed through
//! untouched; both are compatibility behaviors of the chat surface this
//! output targets.

use std::borrow::Cow;
use std::fmt;
use std::iter::{Enumerate, FusedIterator};
use std::str::Split;

pub const CODE_FENCE: &str = "```";
pub const LINE_BREAK: &str = "<br/>";
pub const CLOSE_CODE_BLOCK: &str = "</code></pre>";

/// Render `text` into display markup.
#[must_use]
pub fn render(text: &str) -> String {
    Markup::new(text).to_string()
}

/// Render every `(user, assistant)` pair for display.
pub fn render_pairs<'a, I>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(user, assistant)| (render(user), render(assistant)))
        .collect()
}

/// Lazy, restartable markup view over a borrowed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Markup<'a> {
    text: &'a str,
}

impl<'a> Markup<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    /// Markup segments, one per input line.
    #[must_use]
    pub fn segments(&self) -> Segments<'a> {
        Segments {
            lines: self.text.split('\n').enumerate(),
        }
    }
}

impl fmt::Display for Markup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.segments() {
            f.write_str(&segment)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Segments<'a> {
    lines: Enumerate<Split<'a, char>>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, line) = self.lines.next()?;
        Some(render_line(index, line))
    }
}

impl FusedIterator for Segments<'_> {}

fn render_line(index: usize, line: &str) -> Cow<'_, str> {
    if let Some((_, tag)) = line.split_once(CODE_FENCE) {
        let tag = tag.trim();
        if tag.is_empty() {
            return Cow::Borrowed(CLOSE_CODE_BLOCK);
        }
        return Cow::Owned(format!(
            "<pre><code class=\"{}\">",
            escape_angle_brackets(tag).replace('"', "&quot;")
        ));
    }

    if index == 0 {
        return Cow::Borrowed(line);
    }

    Cow::Owned(format!("{LINE_BREAK}{}", escape_angle_brackets(line)))
}

/// Replace `<` and `>` with their entity forms. Nothing else is escaped.
#[must_use]
pub fn escape_angle_brackets(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace('<', "&lt;").replace('>', "&gt;"))
}
