//! Frame reader
//!
//! Splits the incoming character stream into messages. The wire has no
//! delimiter, so boundaries come from the declared length, from the end of
//! the JSON value for settings payloads, and otherwise from the read boundary.
//!
//! A declared length is only trusted until the next read arrives. If that
//! read opens with a frame header while a frame is still short of its
//! declared length, the length was bogus and the waiting frame ends at the
//! read boundary instead.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::codec::{decode_header, decode_message, starts_with_prefix, HEADER_CHARS, MAX_FRAME_CHARS};
use super::Message;
use crate::error::{K17Error, Result};

/// Accumulates socket reads and yields complete messages
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,

    /// Frames already cut, returned before anything in `buffer`
    ready: VecDeque<Result<Message>>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_CHARS),
            ready: VecDeque::new(),
        }
    }

    /// Append one socket read
    pub fn push(&mut self, chunk: &[u8]) {
        if !self.buffer.is_empty() && opens_frame(chunk) {
            while let Some(item) = self.next_buffered() {
                self.ready.push_back(item);
            }
            if self.waits_on_declared_length() {
                let stale = self.buffer.split();
                tracing::debug!(
                    "Frame of {} chars overtaken by a new header, ending it at the read boundary",
                    stale.len()
                );
                self.ready.push_back(decode_message(&stale));
            }
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Characters waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decode every complete frame currently buffered, in arrival order
    pub fn drain(&mut self) -> Vec<Result<Message>> {
        let mut out = Vec::new();
        while let Some(item) = self.next_frame() {
            out.push(item);
        }
        out
    }

    /// Decode the next frame
    ///
    /// Returns `None` when more input is needed. An `Err` means a span of
    /// input was discarded; the reader stays usable.
    pub fn next_frame(&mut self) -> Option<Result<Message>> {
        match self.ready.pop_front() {
            Some(item) => Some(item),
            None => self.next_buffered(),
        }
    }

    fn next_buffered(&mut self) -> Option<Result<Message>> {
        let leading_ws = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.advance(leading_ws);

        if self.buffer.len() < 2 {
            return None;
        }

        if !starts_with_prefix(&self.buffer) {
            return Some(Err(self.resync()));
        }

        if self.buffer.len() < HEADER_CHARS {
            return None;
        }

        let header = match decode_header(&self.buffer) {
            Ok(header) => header,
            Err(_) => return Some(Err(self.resync())),
        };

        let body = &self.buffer[HEADER_CHARS..];
        let frame_len = if body.first() == Some(&b'{') {
            match json_end(body) {
                Ok(Some(end)) => HEADER_CHARS + end,
                Ok(None) if self.buffer.len() > MAX_FRAME_CHARS => {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(K17Error::FrameDecode(format!(
                        "Unterminated JSON payload, dropped {} chars",
                        dropped
                    ))));
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!("Bad JSON payload for command 0x{:02x}: {}", header.command, e);
                    return Some(Err(self.resync()));
                }
            }
        } else if header.has_usable_length() {
            let declared = header.declared_len as usize;
            if self.buffer.len() < declared {
                return None;
            }
            declared
        } else {
            // No usable length: the rest of this read is the message
            tracing::debug!(
                "Declared length {} unusable for command 0x{:02x}, taking {} chars",
                header.declared_len,
                header.command,
                self.buffer.len()
            );
            self.buffer.len()
        };

        let frame = self.buffer.split_to(frame_len);
        Some(decode_message(&frame))
    }

    /// True when the buffer holds the start of a hex frame that is still
    /// short of its declared length
    fn waits_on_declared_length(&self) -> bool {
        match decode_header(&self.buffer) {
            Ok(header) => {
                self.buffer.get(HEADER_CHARS) != Some(&b'{')
                    && header.has_usable_length()
                    && self.buffer.len() < header.declared_len as usize
            }
            Err(_) => false,
        }
    }

    /// Discard input up to the next plausible frame start
    fn resync(&mut self) -> K17Error {
        let skip = (1..self.buffer.len())
            .find(|&i| starts_with_prefix(&self.buffer[i..]))
            .unwrap_or(self.buffer.len());

        let garbage = self.buffer.split_to(skip);
        let shown = String::from_utf8_lossy(&garbage).into_owned();
        if garbage.iter().all(u8::is_ascii_hexdigit) {
            K17Error::FrameDecode(format!("Discarded {} chars: {:?}", garbage.len(), shown))
        } else {
            K17Error::MalformedEncoding(format!(
                "Discarded {} chars: {:?}",
                garbage.len(),
                shown
            ))
        }
    }
}

/// True if `chunk` opens with a complete, decodable frame header
fn opens_frame(chunk: &[u8]) -> bool {
    let start = chunk
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    decode_header(&chunk[start..]).is_ok()
}

/// Length of the JSON object at the start of `text`
///
/// `Ok(None)` means the object is not complete yet.
fn json_end(text: &[u8]) -> Result<Option<usize>> {
    let mut values = serde_json::Deserializer::from_slice(text).into_iter::<Value>();
    match values.next() {
        Some(Ok(_)) => Ok(Some(values.byte_offset())),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(K17Error::FrameDecode(format!("Invalid JSON payload: {}", e))),
        None => Ok(None),
    }
}
