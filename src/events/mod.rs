//! Events Module
//!
//! Unsolicited device notifications and session lifecycle changes,
//! fanned out to subscribers off the reader thread.
//!
//! ## Delivery
//! - One bounded queue per subscriber
//! - Publishing never blocks; a full queue drops the event with a warning
//! - Per-subscriber order matches publish order

mod bus;

pub use bus::{PushEventBus, SubscriptionId};

use bytes::Bytes;

use crate::network::SessionState;
use crate::protocol::{Message, Prefix};

/// An unsolicited frame, passed through without interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub prefix: Prefix,
    pub command: u8,
    pub payload: Bytes,
}

impl From<&Message> for PushEvent {
    fn from(msg: &Message) -> Self {
        Self {
            prefix: msg.prefix,
            command: msg.command,
            payload: msg.raw_payload.clone(),
        }
    }
}

/// Everything a subscriber can observe
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Volume knob turned on the device
    VolumeChanged(u16),

    /// Any unsolicited frame (including knob pushes)
    Push(PushEvent),

    /// Session moved to a new state
    StateChanged(SessionState),

    /// Incoming bytes were dropped by the frame reader
    FrameError(String),
}
