//! Message router
//!
//! Runs on the reader thread, once per decoded message, in stream order.

use std::sync::Arc;

use super::RequestDispatcher;
use crate::events::PushEventBus;
use crate::protocol::{Message, Prefix};

/// Where a message ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Resolved the outstanding request
    Response,

    /// Published as an unsolicited event
    Push,
}

/// Sends acks to the dispatcher and everything else to the event bus
#[derive(Debug, Clone)]
pub struct MessageRouter {
    dispatcher: Arc<RequestDispatcher>,
    bus: Arc<PushEventBus>,
}

impl MessageRouter {
    pub fn new(dispatcher: Arc<RequestDispatcher>, bus: Arc<PushEventBus>) -> Self {
        Self { dispatcher, bus }
    }

    pub fn route(&self, msg: Message) -> Route {
        let msg = match self.dispatcher.complete(msg) {
            None => return Route::Response,
            Some(msg) => msg,
        };

        if msg.prefix == Prefix::Ack && msg.volume().is_none() {
            tracing::debug!("Unmatched ack for 0x{:02x}, treating as push", msg.command);
        } else {
            tracing::trace!("Push 0x{:02x} from device", msg.command);
        }
        self.bus.publish_push(&msg);
        Route::Push
    }
}
