//! Incremental NDJSON line splitting.
//!
//! Used both by the live stdout drain in `claude-driver` and by the history
//! reader when parsing on-disk `.jsonl` logs: bytes go in, complete lines
//! come out, and a non-whitespace trailing fragment is flushed once on
//! stream end.

use crate::error::{CuiError, Result};

// ─── LineBuffer ───────────────────────────────────────────────────────────

/// Stateful splitter that buffers bytes until a `\n` is seen.
///
/// A malformed JSON line fails only its own [`parse_line`] call; the buffer
/// itself is never corrupted by decoder errors.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every complete line it closes.
    ///
    /// Lines are returned without the trailing `\n` (and without `\r` for
    /// CRLF input). Empty and whitespace-only lines are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_owned());
            }
        }
        lines
    }

    /// Flush the trailing buffer as a final line on stream end.
    ///
    /// Returns `None` when the remainder is empty or whitespace.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&rest);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

// ─── Line decoding ────────────────────────────────────────────────────────

/// Decode one NDJSON line into a value of type `T`.
///
/// On failure the offending line is attached to the error so the caller can
/// log it and keep going.
pub fn parse_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line).map_err(|e| {
        CuiError::InvalidRequest(format!("malformed NDJSON line: {e}\n  line: {line}"))
    })
}
