//! Newline-delimited JSON response decoding.
//!
//! Generate endpoints stream one JSON object per line. Each object carries an
//! incremental text fragment in `response` (or `message.content` for chat-style
//! endpoints), a `done` flag, optionally an `error`, and on the final object an
//! `eval_count` with the number of generated tokens.
//!
//! Network reads do not respect line boundaries, so the decoder buffers partial
//! lines until their newline arrives.

use crate::{Result, TilescribeError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Something the decoder found in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental piece of generated text.
    Fragment(String),
    /// The final object arrived.
    Done { eval_count: Option<u64> },
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    text: String,
    fragments: u64,
    done: bool,
    eval_count: Option<u64>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and decode every complete line.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::Recognition` when a line carries an `error` field and
    /// `TilescribeError::Serialization` when a complete line is not valid JSON.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>> {
        self.pending.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            self.decode_line(&line, &mut events)?;
        }
        Ok(events)
    }

    /// Decode whatever is left after the body ended without a trailing newline.
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        let line = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        self.decode_line(&line, &mut events)?;
        Ok(events)
    }

    /// Decode a complete, non-streamed body.
    ///
    /// Accepts a single (possibly pretty-printed) JSON object as well as a full
    /// newline-delimited stream.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut decoder = Self::new();
        if let Ok(line) = serde_json::from_slice::<GenerateLine>(body) {
            let mut events = Vec::new();
            decoder.apply(line, &mut events)?;
            return Ok(decoder);
        }
        decoder.push(body)?;
        decoder.finish()?;
        Ok(decoder)
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) -> Result<()> {
        let trimmed = raw.trim_ascii();
        if trimmed.is_empty() {
            return Ok(());
        }
        let line: GenerateLine = serde_json::from_slice(trimmed)?;
        self.apply(line, events)
    }

    fn apply(&mut self, line: GenerateLine, events: &mut Vec<StreamEvent>) -> Result<()> {
        if let Some(error) = line.error {
            return Err(TilescribeError::recognition(format!("backend reported an error: {}", error)));
        }

        let fragment = line.response.or(line.message.map(|m| m.content)).unwrap_or_default();
        if !fragment.is_empty() {
            self.text.push_str(&fragment);
            self.fragments += 1;
            events.push(StreamEvent::Fragment(fragment));
        }

        if line.done {
            self.done = true;
            self.eval_count = line.eval_count.or(self.eval_count);
            events.push(StreamEvent::Done {
                eval_count: line.eval_count,
            });
        }
        Ok(())
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn fragment_count(&self) -> u64 {
        self.fragments
    }

    /// Generated tokens: the backend's count when reported, else the fragment count.
    pub fn tokens(&self) -> u64 {
        self.eval_count.unwrap_or(self.fragments)
    }
}
