//! Session
//!
//! Owns the device connection lifecycle:
//!
//! ```text
//! DISCONNECTED ──connect()──▶ CONNECTING ──tcp up──▶ HANDSHAKING ──INIT+GET_SETTINGS──▶ READY
//!      ▲                          │                       │                              │
//!      └──────── socket error / EOF / handshake or health-check failure ◀────────────────┘
//!      └──────── CLOSING ◀── disconnect()
//! ```
//!
//! A single reader thread per connection feeds every incoming byte through
//! the frame reader and router; callers only ever wait on the dispatcher.

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use super::connection::{describe_read_error, Connection};
use super::{FrameSink, MessageRouter, RequestDispatcher, Route, SessionState};
use crate::config::Config;
use crate::error::{K17Error, Result};
use crate::events::{DeviceEvent, PushEventBus, SubscriptionId};
use crate::protocol::{Command, FrameReader, Message};
use crate::settings::{DeviceSettings, Volume};

/// The socket and per-connection threads of one connect() call
struct Link {
    conn: Arc<Connection>,

    /// Dropping this stops the health-check thread
    health_stop: Option<Sender<()>>,
}

struct Inner {
    config: Config,

    /// Current state; lock order is `state` before `link`
    state: Mutex<SessionState>,

    /// Identifies the current connection; stale threads compare against it
    generation: AtomicU64,

    /// Set by disconnect(), cleared by connect()
    close_requested: AtomicBool,

    link: RwLock<Option<Link>>,
    dispatcher: Arc<RequestDispatcher>,
    bus: Arc<PushEventBus>,
    router: MessageRouter,

    /// Last known settings, kept current from acks and knob pushes
    settings: RwLock<Option<DeviceSettings>>,

    /// Serializes connect() calls
    connect_lock: Mutex<()>,
}

/// Handle to one device session
///
/// Clones share the same session. Dropping the last handle closes the
/// connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

/// Frames written on behalf of one connection generation
struct LinkSink<'a> {
    inner: &'a Inner,
    conn: &'a Connection,
    generation: u64,
}

impl FrameSink for LinkSink<'_> {
    fn write_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let result = self.conn.write_frame(frame);
        if let Err(e) = &result {
            self.inner
                .teardown(self.generation, &format!("write failed: {}", e));
        }
        result
    }
}

impl Session {
    /// Create a disconnected session
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let dispatcher = Arc::new(RequestDispatcher::new(
            config.dispatch_policy,
            config.request_timeout,
        ));
        let bus = Arc::new(PushEventBus::new(config.event_queue_capacity));
        let router = MessageRouter::new(Arc::clone(&dispatcher), Arc::clone(&bus));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(SessionState::Disconnected),
                generation: AtomicU64::new(0),
                close_requested: AtomicBool::new(false),
                link: RwLock::new(None),
                dispatcher,
                bus,
                router,
                settings: RwLock::new(None),
                connect_lock: Mutex::new(()),
            }),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the connection and run the INIT + GET_SETTINGS handshake
    ///
    /// Calling this while READY returns the cached settings.
    pub fn connect(&self) -> Result<DeviceSettings> {
        let inner = &self.inner;
        let _connecting = inner.connect_lock.lock();
        inner.close_requested.store(false, Ordering::SeqCst);

        let generation = {
            let mut state = inner.state.lock();
            match *state {
                SessionState::Disconnected => {}
                SessionState::Ready => {
                    return inner.settings.read().clone().ok_or_else(|| {
                        K17Error::InvalidSettings("no settings cached".to_string())
                    });
                }
                other => {
                    return Err(K17Error::HandshakeFailed(format!(
                        "session is {}",
                        other
                    )))
                }
            }
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            inner.set_state(&mut state, SessionState::Connecting);
            generation
        };

        let address = inner.config.address();
        tracing::info!("Connecting to {}", address);

        let (conn, read_stream) = match Connection::open(
            &address,
            inner.config.connect_timeout,
            inner.config.request_timeout,
        ) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!("Connect to {} failed: {}", address, e);
                inner.abandon(generation);
                return Err(e);
            }
        };
        let conn = Arc::new(conn);

        {
            let mut state = inner.state.lock();
            if inner.generation.load(Ordering::SeqCst) != generation
                || *state != SessionState::Connecting
            {
                conn.shutdown();
                return Err(K17Error::HandshakeFailed(
                    "session closed while connecting".to_string(),
                ));
            }
            *inner.link.write() = Some(Link {
                conn: Arc::clone(&conn),
                health_stop: None,
            });
            inner.set_state(&mut state, SessionState::Handshaking);
        }

        let weak = Arc::downgrade(inner);
        let spawned = thread::Builder::new()
            .name(format!("k17-reader-{}", generation))
            .spawn(move || reader_loop(weak, read_stream, generation));
        if let Err(e) = spawned {
            inner.teardown(generation, "reader thread failed to start");
            return Err(e.into());
        }

        let settings = match self.handshake() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Handshake with {} failed: {}", conn.peer_addr(), e);
                inner.teardown(generation, "handshake failed");
                return Err(match e {
                    K17Error::HandshakeFailed(_) => e,
                    other => K17Error::HandshakeFailed(other.to_string()),
                });
            }
        };

        {
            let mut state = inner.state.lock();
            if inner.generation.load(Ordering::SeqCst) != generation
                || *state != SessionState::Handshaking
            {
                return Err(K17Error::HandshakeFailed(
                    "connection lost during handshake".to_string(),
                ));
            }

            *inner.settings.write() = Some(settings.clone());
            let (stop_tx, stop_rx) = channel::bounded::<()>(0);
            if let Some(link) = inner.link.write().as_mut() {
                link.health_stop = Some(stop_tx);
            }
            inner.set_state(&mut state, SessionState::Ready);

            let weak = Arc::downgrade(inner);
            let interval = inner.config.health_check_interval;
            let spawned = thread::Builder::new()
                .name(format!("k17-health-{}", generation))
                .spawn(move || health_loop(weak, stop_rx, generation, interval));
            if let Err(e) = spawned {
                tracing::warn!("Health check thread failed to start: {}", e);
            }
        }

        tracing::info!(
            "Session ready with {} (volume {})",
            conn.peer_addr(),
            settings.current_volume
        );
        Ok(settings)
    }

    /// Close the session; pending and queued requests fail with ConnectionLost
    ///
    /// A closed session is not reconnected by the supervisor.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.close_requested.store(true, Ordering::SeqCst);

        let link = {
            let mut state = inner.state.lock();
            match *state {
                SessionState::Disconnected | SessionState::Closing => return,
                _ => {}
            }
            inner.generation.fetch_add(1, Ordering::SeqCst);
            inner.set_state(&mut state, SessionState::Closing);
            inner.link.write().take()
        };

        if let Some(link) = link {
            link.conn.shutdown();
        }
        let released = inner.dispatcher.fail_all();

        let mut state = inner.state.lock();
        inner.set_state(&mut state, SessionState::Disconnected);
        tracing::info!("Session closed; released {} request(s)", released);
    }

    fn handshake(&self) -> Result<DeviceSettings> {
        self.inner
            .request(Command::Init, SessionState::Handshaking)
            .map_err(|e| K17Error::HandshakeFailed(format!("INIT: {}", e)))?;

        let ack = self
            .inner
            .request(Command::GetSettings, SessionState::Handshaking)
            .map_err(|e| K17Error::HandshakeFailed(format!("GET_SETTINGS: {}", e)))?;

        parse_settings(&ack).map_err(|e| K17Error::HandshakeFailed(format!("GET_SETTINGS: {}", e)))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Set the volume; returns the level the device echoed
    ///
    /// Levels above 100 are rejected before anything is sent. Not retried on
    /// timeout.
    pub fn set_volume(&self, level: u16) -> Result<u16> {
        let volume = Volume::new(level)?;
        let ack = self.inner.request(
            Command::SetVolume {
                volume: volume.get(),
            },
            SessionState::Ready,
        )?;

        let echoed = ack
            .volume()
            .ok_or_else(|| K17Error::FrameDecode("SET_VOLUME ack without a volume".to_string()))?;
        if echoed != level {
            tracing::warn!("Requested volume {} but device reports {}", level, echoed);
        }
        self.inner.update_volume(echoed);
        Ok(echoed)
    }

    /// Query the device settings
    pub fn get_settings(&self) -> Result<DeviceSettings> {
        self.inner.get_settings()
    }

    /// Raise the volume one step; no-op at 100
    pub fn volume_up(&self) -> Result<u16> {
        self.step_volume(1)
    }

    /// Lower the volume one step; no-op at 0
    pub fn volume_down(&self) -> Result<u16> {
        self.step_volume(-1)
    }

    /// The device has no mute, so muting sets the volume to 0
    pub fn mute(&self) -> Result<u16> {
        self.set_volume(0)
    }

    /// Send an arbitrary command and return the message that answered it
    pub fn send_command(&self, command: Command) -> Result<Message> {
        self.inner.request(command, SessionState::Ready)
    }

    fn step_volume(&self, delta: i32) -> Result<u16> {
        let current = match self.volume() {
            Some(v) => v,
            None => self.get_settings()?.current_volume.get(),
        };
        let target = Volume::saturating(current as i32).step(delta);
        if target.get() == current {
            return Ok(current);
        }
        self.set_volume(target.get())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Call `callback` with every knob volume change
    pub fn subscribe_volume_changes<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(u16) + Send + 'static,
    {
        self.inner.bus.subscribe_filtered(
            |e| matches!(e, DeviceEvent::VolumeChanged(_)),
            move |e| {
                if let DeviceEvent::VolumeChanged(v) = e {
                    callback(v);
                }
            },
        )
    }

    /// Call `callback` with the command byte and payload of every push
    pub fn subscribe_raw_push<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(u8, &[u8]) + Send + 'static,
    {
        self.inner.bus.subscribe_filtered(
            |e| matches!(e, DeviceEvent::Push(_)),
            move |e| {
                if let DeviceEvent::Push(push) = e {
                    callback(push.command, &push.payload);
                }
            },
        )
    }

    /// Call `callback` on every state transition
    pub fn subscribe_state_changes<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(SessionState) + Send + 'static,
    {
        self.inner.bus.subscribe_filtered(
            |e| matches!(e, DeviceEvent::StateChanged(_)),
            move |e| {
                if let DeviceEvent::StateChanged(state) = e {
                    callback(state);
                }
            },
        )
    }

    /// Call `callback` whenever incoming bytes are dropped as undecodable
    pub fn subscribe_frame_errors<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(String) + Send + 'static,
    {
        self.inner.bus.subscribe_filtered(
            |e| matches!(e, DeviceEvent::FrameError(_)),
            move |e| {
                if let DeviceEvent::FrameError(reason) = e {
                    callback(reason);
                }
            },
        )
    }

    /// Receive every event on a channel
    pub fn subscribe(&self) -> (SubscriptionId, Receiver<DeviceEvent>) {
        self.inner.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Settings from the last handshake or query, with the volume kept current
    pub fn cached_settings(&self) -> Option<DeviceSettings> {
        self.inner.settings.read().clone()
    }

    /// Last known volume
    pub fn volume(&self) -> Option<u16> {
        self.inner
            .settings
            .read()
            .as_ref()
            .map(|s| s.current_volume.get())
    }

    /// True when the last known volume is 0
    pub fn is_muted(&self) -> Option<bool> {
        self.volume().map(|v| v == 0)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.inner.close_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn bus(&self) -> &Arc<PushEventBus> {
        &self.inner.bus
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.config.address())
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    /// Move to `next` and announce it; caller holds the state lock
    fn set_state(&self, state: &mut SessionState, next: SessionState) {
        if *state == next {
            return;
        }
        tracing::info!("Session state {} -> {}", state, next);
        *state = next;
        self.bus.publish(DeviceEvent::StateChanged(next));
    }

    /// Issue a request if the session is in `required` state
    fn request(&self, command: Command, required: SessionState) -> Result<Message> {
        let (conn, generation) = {
            let state = self.state.lock();
            if *state != required {
                return Err(K17Error::NotConnected);
            }
            match self.link.read().as_ref() {
                Some(link) => (Arc::clone(&link.conn), self.generation.load(Ordering::SeqCst)),
                None => return Err(K17Error::NotConnected),
            }
        };

        let sink = LinkSink {
            inner: self,
            conn: &conn,
            generation,
        };
        self.dispatcher.send(&sink, &command)
    }

    fn get_settings(&self) -> Result<DeviceSettings> {
        let ack = self.request(Command::GetSettings, SessionState::Ready)?;
        let settings = parse_settings(&ack)?;
        *self.settings.write() = Some(settings.clone());
        Ok(settings)
    }

    fn update_volume(&self, level: u16) {
        if let Some(settings) = self.settings.write().as_mut() {
            settings.current_volume = Volume::saturating(level as i32);
        }
    }

    /// Route one decoded message
    fn dispatch(&self, msg: Message) {
        let knob = msg.volume();
        if self.router.route(msg) == Route::Push {
            if let Some(level) = knob {
                self.update_volume(level);
            }
        }
    }

    /// Connection attempt failed before any link existed
    fn abandon(&self, generation: u64) {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) == generation
            && *state == SessionState::Connecting
        {
            self.set_state(&mut state, SessionState::Disconnected);
        }
    }

    /// Drop the connection of `generation` after an error
    ///
    /// No-op when that connection is already gone or was replaced.
    fn teardown(&self, generation: u64, reason: &str) -> bool {
        let link = {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation
                || matches!(*state, SessionState::Disconnected | SessionState::Closing)
            {
                return false;
            }
            let link = self.link.write().take();
            tracing::warn!("Connection lost: {}", reason);
            self.set_state(&mut state, SessionState::Disconnected);
            link
        };

        if let Some(mut link) = link {
            link.health_stop.take();
            link.conn.shutdown();
        }
        let released = self.dispatcher.fail_all();
        if released > 0 {
            tracing::debug!("Released {} request(s) as ConnectionLost", released);
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.conn.shutdown();
        }
        self.dispatcher.fail_all();
    }
}

fn parse_settings(ack: &Message) -> Result<DeviceSettings> {
    let text = ack
        .text()
        .ok_or_else(|| K17Error::InvalidSettings("settings ack carried no JSON".to_string()))?;
    DeviceSettings::from_json(text)
}

/// Single reader per connection: socket -> frames -> router
fn reader_loop(inner: Weak<Inner>, mut stream: TcpStream, generation: u64) {
    let buffer_size = match inner.upgrade() {
        Some(inner) => inner.config.read_buffer_size,
        None => return,
    };
    let mut frames = FrameReader::new();
    let mut buf = vec![0u8; buffer_size];

    let reason = loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break "connection closed by device".to_string(),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => break describe_read_error(&e),
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        tracing::trace!("Read {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
        frames.push(&buf[..n]);
        for item in frames.drain() {
            match item {
                Ok(msg) => inner.dispatch(msg),
                Err(e) => {
                    tracing::warn!("Dropped incoming data: {}", e);
                    inner.bus.publish(DeviceEvent::FrameError(e.to_string()));
                }
            }
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.teardown(generation, &reason);
    }
}

/// Periodic GET_SETTINGS while READY; any failure except a busy slot drops
/// the connection
fn health_loop(inner: Weak<Inner>, stop: Receiver<()>, generation: u64, interval: std::time::Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        match inner.get_settings() {
            Ok(settings) => {
                tracing::debug!("Health check ok (volume {})", settings.current_volume);
            }
            Err(K17Error::NotConnected) => return,
            Err(K17Error::Busy) => {
                tracing::debug!("Health check skipped, a request is in flight");
            }
            Err(e) => {
                tracing::warn!("Health check failed: {}", e);
                inner.teardown(generation, "health check failed");
                return;
            }
        }
    }
}
