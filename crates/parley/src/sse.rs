//! Incremental Server-Sent Events decoding
//!
//! SSE format:
//! ```text
//! data: {"json": "content"}
//!
//! data: more content
//!
//! data: [DONE]
//! ```
//!
//! [`SseDecoder`] frames raw bytes into events as they arrive. [`SseReader`]
//! drives a byte stream through the decoder and yields typed JSON records,
//! dropping the underlying stream as soon as `[DONE]` is seen.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ParleyError, Result};

const DONE_MARKER: &str = "[DONE]";

/// Represents a parsed SSE event
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Data event containing the payload
    Data(String),
    /// Terminal [DONE] marker
    Done,
}

/// Buffers raw bytes and splits them into complete events
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Start of the first buffered line not yet known to be complete
    scanned: usize,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` has been decoded; later input is ignored
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of buffered bytes not yet part of a complete event
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed bytes and return every event completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }

        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((event_end, consumed)) =
            find_event_boundary(&self.buffer, &mut self.scanned)
        {
            let raw: Vec<u8> = self.buffer.drain(..consumed).take(event_end).collect();
            self.scanned = 0;
            if let Some(event) = self.decode_event(&raw) {
                events.push(event);
                if self.done {
                    self.buffer.clear();
                    self.scanned = 0;
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing event that was never terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.scanned = 0;
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        self.decode_event(&raw)
    }

    fn decode_event(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let text = String::from_utf8_lossy(raw);
        let mut data: Option<String> = None;

        for line in text.lines() {
            let Some(value) = line.strip_prefix("data:") else {
                continue;
            };
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }

        let data = data?;
        if data.trim() == DONE_MARKER {
            self.done = true;
            Some(SseEvent::Done)
        } else {
            Some(SseEvent::Data(data))
        }
    }
}

/// Find the first blank line in `buf`, starting at the line that begins at
/// `*scan_from`.
///
/// Returns `(event_end, consumed)`: the event occupies `buf[..event_end]` and
/// `buf[..consumed]` includes the blank line itself. When no blank line is
/// found, `*scan_from` is moved to the start of the unterminated last line so
/// the next call does not rescan complete lines.
fn find_event_boundary(buf: &[u8], scan_from: &mut usize) -> Option<(usize, usize)> {
    let mut line_start = *scan_from;
    while let Some(offset) = buf[line_start..].iter().position(|&b| b == b'\n') {
        let newline = line_start + offset;
        let line = &buf[line_start..newline];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return Some((line_start, newline + 1));
        }
        line_start = newline + 1;
    }
    *scan_from = line_start;
    None
}

/// Reads typed JSON records from an SSE byte stream
pub struct SseReader<S> {
    inner: Option<S>,
    decoder: SseDecoder,
    queued: VecDeque<SseEvent>,
    skipped: usize,
    idle_timeout: Option<Duration>,
}

impl<S, E> SseReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            decoder: SseDecoder::new(),
            queued: VecDeque::new(),
            skipped: 0,
            idle_timeout: None,
        }
    }

    /// Fail with a network error when no bytes arrive for `limit`.
    ///
    /// The limit applies to each read, not to the stream as a whole, so a
    /// slow but steady stream may run for any length of time.
    pub fn with_idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Number of events skipped because they failed to parse
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// True once the underlying stream has been released
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Return the next record, or `None` at `[DONE]` or end of stream.
    ///
    /// Malformed payloads are logged and skipped.
    pub async fn next_record<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            while let Some(event) = self.queued.pop_front() {
                match event {
                    SseEvent::Done => {
                        debug!("SSE stream signalled [DONE]");
                        self.close();
                        return Ok(None);
                    }
                    SseEvent::Data(payload) => match serde_json::from_str::<T>(&payload) {
                        Ok(record) => return Ok(Some(record)),
                        Err(e) => {
                            self.skipped += 1;
                            warn!("Skipping malformed SSE event: {e}; payload: {payload}");
                        }
                    },
                }
            }

            let Some(inner) = self.inner.as_mut() else {
                return Ok(None);
            };

            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, inner.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.close();
                        return Err(ParleyError::Network(format!(
                            "Stream stalled: no data for {limit:?}"
                        )));
                    }
                },
                None => inner.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    self.queued.extend(self.decoder.push(&chunk));
                }
                Some(Err(e)) => {
                    self.close();
                    return Err(ParleyError::Network(format!("Stream read failed: {e}")));
                }
                None => {
                    self.inner = None;
                    self.queued.extend(self.decoder.finish());
                    if self.queued.is_empty() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        self.inner = None;
        self.queued.clear();
    }
}
