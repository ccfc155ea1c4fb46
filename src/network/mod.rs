//! Network Module
//!
//! Device session and everything that talks to the socket.
//!
//! ## Architecture
//! - One reader thread per connection (frames -> router)
//! - Callers block in the dispatcher, one request in flight at a time
//! - Supervisor thread re-runs connect + handshake after drops

mod connection;
mod dispatcher;
mod router;
mod session;
mod supervisor;

pub use connection::Connection;
pub use dispatcher::{FrameSink, RequestDispatcher};
pub use router::{MessageRouter, Route};
pub use session::Session;
pub use supervisor::{Backoff, ReconnectSupervisor};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Ready => "READY",
            SessionState::Closing => "CLOSING",
        };
        f.write_str(name)
    }
}
