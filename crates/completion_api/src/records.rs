use serde_json::Value;
use thiserror::Error;

/// Length of the framing marker (`data: `) that precedes every payload.
pub const FRAMING_MARKER_LEN: usize = 6;
/// Payload of the record that closes a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const CONTENT_POINTER: &str = "/choices/0/delta/content";

/// One decoded stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    /// Empty separator line between events.
    Blank,
    /// End-of-stream sentinel.
    Done,
    /// Incremental assistant text.
    Delta(String),
}

/// Per-record decode failure. Never fatal to a stream.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("record is shorter than the {FRAMING_MARKER_LEN}-byte framing marker")]
    MissingFramingMarker,
    #[error("record payload is not valid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),
    #[error("record carries no choices[0].delta.content text")]
    MissingContent,
    /// `:`-prefixed comment line, used by servers as a keep-alive.
    #[error("comment record")]
    Comment,
}

impl RecordError {
    /// True for records that look like a protocol problem rather than an
    /// expected content-less event (role announcements, finish markers,
    /// keep-alive comments).
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::MissingContent | Self::Comment)
    }
}

/// Decode one newline-delimited record.
pub fn decode_record(record: &[u8]) -> Result<StreamRecord, RecordError> {
    let text = std::str::from_utf8(record)?;
    if text.trim().is_empty() {
        return Ok(StreamRecord::Blank);
    }
    if text.starts_with(':') {
        return Err(RecordError::Comment);
    }

    let payload = text
        .get(FRAMING_MARKER_LEN..)
        .ok_or(RecordError::MissingFramingMarker)?
        .trim();
    if payload == DONE_SENTINEL {
        return Ok(StreamRecord::Done);
    }

    let value: Value = serde_json::from_str(payload).map_err(RecordError::MalformedJson)?;
    value
        .pointer(CONTENT_POINTER)
        .and_then(Value::as_str)
        .map(|content| StreamRecord::Delta(content.to_owned()))
        .ok_or(RecordError::MissingContent)
}

/// Incremental splitter for newline-delimited byte streams.
///
/// Records are kept as bytes so a multi-byte character split across two
/// transport chunks is reassembled before UTF-8 decoding.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buffer: Vec<u8>,
}

impl RecordSplitter {
    /// Feed arbitrary bytes and drain complete records (terminator removed).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut records = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut record: Vec<u8> = self.buffer.drain(..=split).collect();
            record.pop();
            if record.last() == Some(&b'\r') {
                record.pop();
            }
            records.push(record);
        }

        records
    }

    /// Flush a trailing record that was not newline-terminated.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut record = std::mem::take(&mut self.buffer);
        if record.last() == Some(&b'\r') {
            record.pop();
        }
        Some(record)
    }

    /// Split a complete payload in one shot, including any unterminated tail.
    #[doc(hidden)]
    pub fn split_all(input: &[u8]) -> Vec<Vec<u8>> {
        let mut splitter = Self::default();
        let mut records = splitter.feed(input);
        records.extend(splitter.finish());
        records
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.is_empty()
    }
}
