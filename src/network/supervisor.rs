//! Reconnect supervisor
//!
//! Watches a session's state changes and, after any drop that was not a
//! deliberate `disconnect()`, re-runs connect + handshake with exponential
//! backoff until the session is READY again. There is no retry limit.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::{Session, SessionState};
use crate::config::BackoffConfig;
use crate::error::Result;
use crate::events::{DeviceEvent, SubscriptionId};

/// Exponential backoff with a stability-window reset
///
/// Delays run `initial, initial*m, initial*m^2, ...` capped at `max`. A READY
/// period that lasts at least `stability_window` before the next drop
/// restarts the sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    ready_since: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            ready_since: None,
        }
    }

    /// Delay before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.config.multiplier.checked_pow(self.attempt).unwrap_or(u32::MAX);
        let delay = self
            .config
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// The session reached READY at `at`
    pub fn mark_ready(&mut self, at: Instant) {
        self.ready_since = Some(at);
    }

    /// The session dropped at `at`; resets if READY held long enough
    pub fn mark_disconnected(&mut self, at: Instant) {
        if let Some(since) = self.ready_since.take() {
            if at.saturating_duration_since(since) >= self.config.stability_window {
                self.reset();
            }
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Background thread that keeps a session connected
pub struct ReconnectSupervisor {
    session: Session,
    subscription: SubscriptionId,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconnectSupervisor {
    /// Start supervising `session`
    ///
    /// A session that is not READY (and was not deliberately closed) is
    /// connected right away, then retried with backoff.
    pub fn start(session: Session) -> Result<Self> {
        let (subscription, events) = session
            .bus()
            .subscribe_where(|e| matches!(e, DeviceEvent::StateChanged(_)));
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let worker = session.clone();
        let spawned = thread::Builder::new()
            .name("k17-supervisor".to_string())
            .spawn(move || supervise(worker, events, stop_rx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                session.unsubscribe(subscription);
                return Err(e.into());
            }
        };

        Ok(Self {
            session,
            subscription,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop reconnecting and wait for the supervisor thread
    ///
    /// An attempt already in progress finishes first (bounded by the connect
    /// and request timeouts). The session itself is left as it is.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn shutdown(&mut self) {
        self.stop_tx.take();
        self.session.unsubscribe(self.subscription);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Supervisor thread panicked");
            }
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn supervise(session: Session, events: Receiver<DeviceEvent>, stop: Receiver<()>) {
    let mut backoff = Backoff::new(session.config().backoff);

    if session.is_ready() {
        backoff.mark_ready(Instant::now());
    } else if !session.close_requested() {
        match session.connect() {
            Ok(_) => {
                backoff.mark_ready(Instant::now());
                events.try_iter().for_each(drop);
            }
            Err(e) => {
                tracing::warn!("Initial connect failed: {}", e);
                if !retry_until_ready(&session, &mut backoff, &events, &stop) {
                    return;
                }
            }
        }
    }

    loop {
        let event = crossbeam::channel::select! {
            recv(stop) -> _ => None,
            recv(events) -> event => event.ok(),
        };

        match event {
            None => break,
            Some(DeviceEvent::StateChanged(SessionState::Disconnected)) => {
                if session.close_requested() {
                    tracing::debug!("Session closed deliberately, not reconnecting");
                    continue;
                }
                backoff.mark_disconnected(Instant::now());
                if !retry_until_ready(&session, &mut backoff, &events, &stop) {
                    break;
                }
            }
            Some(DeviceEvent::StateChanged(SessionState::Ready)) => {
                backoff.mark_ready(Instant::now());
            }
            Some(_) => {}
        }
    }
    tracing::debug!("Supervisor stopped");
}

/// Returns false when asked to stop
fn retry_until_ready(
    session: &Session,
    backoff: &mut Backoff,
    events: &Receiver<DeviceEvent>,
    stop: &Receiver<()>,
) -> bool {
    loop {
        let delay = backoff.next_delay();
        tracing::info!("Reconnecting in {:?} (attempt {})", delay, backoff.attempts());

        match stop.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return false,
        }

        if session.close_requested() {
            return true;
        }

        let outcome = if session.is_ready() {
            Ok(())
        } else {
            session.connect().map(|_| ())
        };

        match outcome {
            Ok(()) => {
                backoff.mark_ready(Instant::now());
                // Transitions from failed attempts and this one are stale now
                events.try_iter().for_each(drop);
                if session.is_ready() {
                    tracing::info!("Reconnected");
                    return true;
                }
                backoff.mark_disconnected(Instant::now());
            }
            Err(e) => tracing::warn!("Reconnect attempt failed: {}", e),
        }
    }
}
