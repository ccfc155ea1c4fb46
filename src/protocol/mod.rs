//! Protocol Module
//!
//! Defines the K17 wire protocol.
//!
//! ## Frame Format
//!
//! ASCII text of hex digit pairs:
//! ```text
//! ┌────────────┬────────────┬──────────────┬─────────────────────┐
//! │ Prefix (1) │ Cmd (1)    │ Len (2)      │ Payload             │
//! └────────────┴────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! ### Prefixes
//! - 0x05: request
//! - 0x06: request (alternate)
//! - 0xa5: ack
//! - 0xa6: unsolicited push
//!
//! ### Known Exchanges
//! - INIT:         `0599000c0000` -> `a599000c0302`
//! - GET_SETTINGS: `05010008`     -> `a501009c{...json...}`
//! - SET_VOLUME:   `0502000c00XX` -> `a502000c00XX`
//! - Knob push:    `a502000c00XX`
//! - Notify push:  `a60a000c000c`

mod command;
mod response;
mod codec;
mod frame;

pub use command::{Command, CommandType, Prefix};
pub use response::{Message, PayloadEncoding};
pub use codec::{
    decode_header, decode_hex, decode_message, encode_command, encode_hex, FrameHeader,
    HEADER_CHARS, MAX_FRAME_CHARS,
};
pub use frame::FrameReader;
