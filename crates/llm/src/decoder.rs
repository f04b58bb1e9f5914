//! Newline framing for streamed response bodies.
//!
//! Network chunks do not line up with event boundaries or even with UTF-8 code
//! point boundaries. [`LineDecoder`] holds the incomplete tail of both until the
//! next chunk supplies the rest, and only hands out lines that were terminated
//! by `\n`.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use super::transport::TransportResult;

/// Longest line [`LineDecoder::new`] accepts, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental bytes-to-lines decoder bound to one response stream.
#[derive(Debug)]
pub struct LineDecoder {
    // Trailing bytes of an unfinished multi-byte sequence.
    held_bytes: Vec<u8>,
    // Decoded text after the last newline.
    buffer: String,
    max_line_bytes: usize,
    // Skipping the rest of an overlong line up to its newline.
    discarding: bool,
    dropped_bytes: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines longer than `max_line_bytes` are dropped whole.
    pub fn with_max_line_length(max_line_bytes: usize) -> Self {
        Self {
            held_bytes: Vec::new(),
            buffer: String::new(),
            max_line_bytes,
            discarding: false,
            dropped_bytes: 0,
        }
    }

    /// Feeds one chunk and returns every line it completed, without the `\n`.
    ///
    /// Empty lines are returned as-is; this type does not know the payload format.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.decode_into_buffer(chunk);

        let mut lines = Vec::new();
        if let Some(last_newline) = self.buffer.rfind('\n') {
            let rest = self.buffer.split_off(last_newline + 1);
            let mut complete = std::mem::replace(&mut self.buffer, rest);
            complete.pop();

            for line in complete.split('\n') {
                if std::mem::take(&mut self.discarding) {
                    // Tail of a line already reported as overlong.
                    self.dropped_bytes += line.len();
                } else if line.len() > self.max_line_bytes {
                    self.drop_overlong(line.len());
                } else {
                    lines.push(line.to_owned());
                }
            }
        }

        if self.discarding {
            self.dropped_bytes += self.buffer.len();
            self.buffer.clear();
        } else if self.buffer.len() > self.max_line_bytes {
            self.drop_overlong(self.buffer.len());
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    /// Bytes dropped so far because their line exceeded the limit.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// Ends the stream, dropping any unterminated tail.
    ///
    /// Returns how many bytes were dropped.
    pub fn discard(self) -> usize {
        self.buffer.len() + self.held_bytes.len()
    }

    fn drop_overlong(&mut self, bytes: usize) {
        self.dropped_bytes += bytes;
        tracing::warn!(
            dropped_bytes = bytes,
            max_line_bytes = self.max_line_bytes,
            "dropping overlong stream line"
        );
    }

    fn decode_into_buffer(&mut self, chunk: &[u8]) {
        let Self {
            held_bytes, buffer, ..
        } = self;
        held_bytes.extend_from_slice(chunk);

        let mut input = held_bytes.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    buffer.push_str(text);
                    input = &[];
                    break;
                }
                Err(error) => {
                    let (valid, after_valid) = input.split_at(error.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        buffer.push_str(text);
                    }

                    match error.error_len() {
                        Some(invalid_len) => {
                            buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &after_valid[invalid_len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            input = after_valid;
                            break;
                        }
                    }
                }
            }
        }

        let tail = input.to_vec();
        *held_bytes = tail;
    }
}

struct LineStreamState<S> {
    bytes: S,
    decoder: Option<LineDecoder>,
    pending: VecDeque<String>,
}

/// Turns a byte stream into a lazy stream of complete lines.
///
/// The byte stream is consumed by value and cannot be restarted. A read error is
/// yielded after the lines that preceded it and ends the stream; an unterminated
/// final line is dropped, as is any line over [`DEFAULT_MAX_LINE_BYTES`].
pub fn decode_lines<S>(bytes: S) -> impl Stream<Item = TransportResult<String>> + Send
where
    S: Stream<Item = TransportResult<Bytes>> + Send + Unpin,
{
    let state = LineStreamState {
        bytes,
        decoder: Some(LineDecoder::new()),
        pending: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }

            let decoder = state.decoder.as_mut()?;

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(decoder.feed(&chunk)),
                Some(Err(error)) => {
                    state.decoder = None;
                    return Some((Err(error), state));
                }
                None => {
                    if let Some(decoder) = state.decoder.take() {
                        let dropped_bytes = decoder.discard();
                        if dropped_bytes > 0 {
                            tracing::debug!(
                                dropped_bytes,
                                "byte stream ended with an unterminated line"
                            );
                        }
                    }
                }
            }
        }
    })
}
