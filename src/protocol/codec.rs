//! Protocol codec
//!
//! Hex conversion and frame encoding/decoding.
//!
//! ## Wire Format
//!
//! Every frame is ASCII text made of hex digit pairs:
//! ```text
//! ┌────────────┬────────────┬──────────────┬─────────────────────┐
//! │ Prefix (2) │ Cmd (2)    │ Len (4)      │ Payload             │
//! └────────────┴────────────┴──────────────┴─────────────────────┘
//! ```
//! Sizes are in characters. `Len` is the big-endian total frame length in
//! characters, header included (`0502000c0025` is 12 characters, `0x000c`).
//! The settings response is the exception: its payload is literal JSON text.

use bytes::Bytes;

use super::{Command, Message, PayloadEncoding, Prefix};
use crate::error::{K17Error, Result};

/// Header size in characters: prefix + command + 16-bit length
pub const HEADER_CHARS: usize = 8;

/// Longest frame the reader will wait for
pub const MAX_FRAME_CHARS: usize = 4096;

// =============================================================================
// Hex Codec
// =============================================================================

/// Encode bytes as lowercase hex, two digits per byte, no separators
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex text (either case) back to bytes
///
/// Fails with `MalformedEncoding` on odd length or non-hex characters.
pub fn decode_hex(text: impl AsRef<[u8]>) -> Result<Vec<u8>> {
    Ok(hex::decode(text)?)
}

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode a command into the ASCII bytes written to the socket
pub fn encode_command(command: &Command) -> Vec<u8> {
    let payload = command.payload();
    let total_chars = (HEADER_CHARS + payload.len() * 2) as u16;

    let mut raw = Vec::with_capacity(4 + payload.len());
    raw.push(command.prefix() as u8);
    raw.push(command.code());
    raw.extend_from_slice(&total_chars.to_be_bytes());
    raw.extend_from_slice(&payload);

    encode_hex(&raw).into_bytes()
}

// =============================================================================
// Frame Decoding
// =============================================================================

/// The fixed part at the start of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub prefix: Prefix,
    pub command: u8,
    pub declared_len: u16,
}

impl FrameHeader {
    /// Whether the declared length can be trusted to cut a hex frame
    pub fn has_usable_length(&self) -> bool {
        let len = self.declared_len as usize;
        len >= HEADER_CHARS && len % 2 == 0 && len <= MAX_FRAME_CHARS
    }
}

/// Decode the 8-character header at the start of `text`
pub fn decode_header(text: &[u8]) -> Result<FrameHeader> {
    if text.len() < HEADER_CHARS {
        return Err(K17Error::FrameDecode(format!(
            "Incomplete header: expected {} chars, got {}",
            HEADER_CHARS,
            text.len()
        )));
    }

    let raw = decode_hex(&text[..HEADER_CHARS])?;
    let prefix = Prefix::from_byte(raw[0])
        .ok_or_else(|| K17Error::FrameDecode(format!("Unknown prefix: 0x{:02x}", raw[0])))?;

    Ok(FrameHeader {
        prefix,
        command: raw[1],
        declared_len: u16::from_be_bytes([raw[2], raw[3]]),
    })
}

/// Decode one complete frame
pub fn decode_message(frame: &[u8]) -> Result<Message> {
    let header = decode_header(frame)?;
    let body = &frame[HEADER_CHARS..];

    if body.first() == Some(&b'{') {
        std::str::from_utf8(body)
            .map_err(|e| K17Error::FrameDecode(format!("Text payload is not UTF-8: {}", e)))?;
        return Ok(Message::new(
            header.prefix,
            header.command,
            Bytes::copy_from_slice(body),
            PayloadEncoding::Text,
        ));
    }

    let payload = decode_hex(body)?;
    Ok(Message::new(
        header.prefix,
        header.command,
        Bytes::from(payload),
        PayloadEncoding::Hex,
    ))
}

/// True if `text` starts with one of the four prefix byte pairs
pub fn starts_with_prefix(text: &[u8]) -> bool {
    if text.len() < 2 {
        return false;
    }
    match decode_hex(&text[..2]) {
        Ok(byte) => Prefix::from_byte(byte[0]).is_some(),
        Err(_) => false,
    }
}
