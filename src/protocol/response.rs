//! Message definitions
//!
//! Represents decoded frames received from the device.

use bytes::Bytes;

use super::{CommandType, Prefix};

/// How the payload was carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Hex digit pairs, decoded to raw bytes
    Hex,

    /// Literal text (the settings JSON), kept as UTF-8 bytes
    Text,
}

/// A decoded protocol message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Prefix,
    pub command: u8,
    pub raw_payload: Bytes,
    pub encoding: PayloadEncoding,
}

impl Message {
    pub fn new(prefix: Prefix, command: u8, raw_payload: Bytes, encoding: PayloadEncoding) -> Self {
        Self {
            prefix,
            command,
            raw_payload,
            encoding,
        }
    }

    /// Volume carried by a SET_VOLUME ack or a knob push (big-endian u16)
    pub fn volume(&self) -> Option<u16> {
        if self.command != CommandType::SetVolume as u8 || self.encoding != PayloadEncoding::Hex {
            return None;
        }
        match &self.raw_payload[..] {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Text payload, if the frame carried one
    pub fn text(&self) -> Option<&str> {
        match self.encoding {
            PayloadEncoding::Text => std::str::from_utf8(&self.raw_payload).ok(),
            PayloadEncoding::Hex => None,
        }
    }
}
