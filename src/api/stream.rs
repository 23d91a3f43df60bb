use super::logging::emit_sse_parse_error;
use crate::types::{ChatCompletionChunk, StreamFragment};
use anyhow::{Context, Result};

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE decoder for chat-completion streams. Bytes may split an
/// event anywhere; complete events are emitted once their blank-line
/// terminator arrives. A multi-byte character split across chunks is held
/// back until its remaining bytes arrive.
#[derive(Default)]
pub struct StreamParser {
    buffer: String,
    pending: Vec<u8>,
    done: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the fragments of every event completed by `chunk`. An event
    /// whose payload is not a valid completion chunk fails the stream.
    pub fn process(&mut self, chunk: &[u8]) -> Result<Vec<StreamFragment>> {
        self.decode(chunk);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut fragments = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let event_end = start + end + 2;
            let event_text = &self.buffer[start..event_end];

            let mut data_lines = Vec::new();
            for line in event_text.lines() {
                if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.trim());
                }
            }
            let data = data_lines.join("\n");

            if data == DONE_SENTINEL {
                self.done = true;
            } else if !data.is_empty() {
                let chunk = serde_json::from_str::<ChatCompletionChunk>(&data)
                    .inspect_err(|e| emit_sse_parse_error(&data, e))
                    .context("malformed stream event")?;
                fragments.extend(chunk.into_fragments());
            }

            start = event_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        Ok(fragments)
    }

    pub fn flush(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        self.buffer.push_str(&String::from_utf8_lossy(&pending));
        std::mem::take(&mut self.buffer)
    }

    fn decode(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.clear();
                return;
            }
            // Invalid bytes, not a truncated character: replace and move on.
            Err(e) if e.error_len().is_some() => {
                let lossy = String::from_utf8_lossy(&self.pending).into_owned();
                self.buffer.push_str(&lossy);
                self.pending.clear();
                return;
            }
            Err(e) => e.valid_up_to(),
        };
        let rest = self.pending.split_off(valid);
        if let Ok(text) = std::str::from_utf8(&self.pending) {
            self.buffer.push_str(text);
        }
        self.pending = rest;
    }
}
