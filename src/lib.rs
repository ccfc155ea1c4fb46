//! # k17link
//!
//! Session engine for the FiiO K17 DAC/amplifier control protocol:
//! - ASCII-hex wire codec and stream framing
//! - One outstanding request at a time, correlated with its ack
//! - Unsolicited pushes (volume knob, notifications) fanned out to subscribers
//! - Health checks and automatic reconnect with backoff
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ReconnectSupervisor                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ connect + handshake
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Session (TCP :12100)                         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ reader thread
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          FrameReader ──▶ MessageRouter                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌──────────────┐         ┌──────────────┐
//!   │  Dispatcher  │         │ PushEventBus │
//!   │ (acks)       │         │ (pushes)     │
//!   └──────────────┘         └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use k17link::{Config, Session};
//!
//! let session = Session::new(Config::builder().host("192.168.1.50").build())?;
//! let settings = session.connect()?;
//! println!("volume {}", settings.current_volume);
//!
//! session.subscribe_volume_changes(|v| println!("knob: {}", v))?;
//! session.set_volume(30)?;
//! session.disconnect();
//! # Ok::<(), k17link::K17Error>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod settings;
pub mod events;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{K17Error, Result};
pub use config::{BackoffConfig, Config, DispatchPolicy};
pub use settings::{DeviceSettings, Volume};
pub use events::{DeviceEvent, PushEvent, SubscriptionId};
pub use network::{ReconnectSupervisor, Session, SessionState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of k17link
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
