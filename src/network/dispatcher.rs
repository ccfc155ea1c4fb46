//! Request dispatcher
//!
//! The protocol has no request IDs, so at most one request is outstanding
//! per session. Callers take a ticket and are served strictly in ticket
//! order; the reader thread resolves the outstanding request through
//! `complete()`.

use std::io;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::DispatchPolicy;
use crate::error::{K17Error, Result};
use crate::protocol::{encode_command, Command, Message, Prefix};

/// Where encoded frames are written
///
/// Implementations must write the whole frame in one piece.
pub trait FrameSink {
    fn write_frame(&self, frame: &[u8]) -> io::Result<()>;
}

/// The request currently awaiting its ack
struct PendingRequest {
    ticket: u64,
    command: u8,
    expected_prefix: Prefix,
    submitted_at: Instant,
    completion: Sender<Result<Message>>,
}

struct DispatchState {
    /// Next ticket handed to a caller
    next_ticket: u64,

    /// Ticket allowed to send; `now_serving == next_ticket` means idle
    now_serving: u64,

    /// Bumped by `fail_all`; callers from an older epoch get ConnectionLost
    epoch: u64,

    pending: Option<PendingRequest>,
}

/// Serializes requests and correlates acks
pub struct RequestDispatcher {
    policy: DispatchPolicy,
    timeout: Duration,
    state: Mutex<DispatchState>,
    turn: Condvar,
}

impl RequestDispatcher {
    pub fn new(policy: DispatchPolicy, timeout: Duration) -> Self {
        Self {
            policy,
            timeout,
            state: Mutex::new(DispatchState {
                next_ticket: 0,
                now_serving: 0,
                epoch: 0,
                pending: None,
            }),
            turn: Condvar::new(),
        }
    }

    /// Send a command and block until its ack, a timeout, or connection loss
    ///
    /// Never retries. A timeout frees the slot for the next caller.
    pub fn send(&self, sink: &dyn FrameSink, command: &Command) -> Result<Message> {
        let (ticket, epoch) = self.acquire_turn()?;
        let result = self.exchange(sink, command, ticket, epoch);
        self.release_turn(epoch);
        result
    }

    /// Offer an incoming message to the outstanding request
    ///
    /// Returns the message back if it does not answer that request.
    pub fn complete(&self, msg: Message) -> Option<Message> {
        let mut state = self.state.lock();
        let matches = state
            .pending
            .as_ref()
            .map_or(false, |p| p.command == msg.command && p.expected_prefix == msg.prefix);
        if !matches {
            return Some(msg);
        }

        if let Some(pending) = state.pending.take() {
            tracing::debug!(
                "Ack for 0x{:02x} after {:?}",
                pending.command,
                pending.submitted_at.elapsed()
            );
            let _ = pending.completion.send(Ok(msg));
        }
        None
    }

    /// Resolve the outstanding request and every queued caller as ConnectionLost
    ///
    /// Returns how many callers were released.
    pub fn fail_all(&self) -> usize {
        let mut state = self.state.lock();
        let released = (state.next_ticket - state.now_serving) as usize;

        if let Some(pending) = state.pending.take() {
            let _ = pending.completion.send(Err(K17Error::ConnectionLost));
        }

        state.epoch += 1;
        state.now_serving = state.next_ticket;
        self.turn.notify_all();
        released
    }

    /// Command byte of the outstanding request
    pub fn pending_command(&self) -> Option<u8> {
        self.state.lock().pending.as_ref().map(|p| p.command)
    }

    /// Callers holding or waiting for the send slot
    pub fn in_flight(&self) -> usize {
        let state = self.state.lock();
        (state.next_ticket - state.now_serving) as usize
    }

    fn acquire_turn(&self) -> Result<(u64, u64)> {
        let mut state = self.state.lock();

        if self.policy == DispatchPolicy::FailFast && state.now_serving != state.next_ticket {
            return Err(K17Error::Busy);
        }

        let ticket = state.next_ticket;
        let epoch = state.epoch;
        state.next_ticket += 1;

        while state.now_serving != ticket {
            if state.epoch != epoch {
                return Err(K17Error::ConnectionLost);
            }
            self.turn.wait(&mut state);
        }
        if state.epoch != epoch {
            return Err(K17Error::ConnectionLost);
        }
        Ok((ticket, epoch))
    }

    fn release_turn(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch == epoch {
            state.now_serving += 1;
        }
        self.turn.notify_all();
    }

    fn exchange(
        &self,
        sink: &dyn FrameSink,
        command: &Command,
        ticket: u64,
        epoch: u64,
    ) -> Result<Message> {
        let (tx, rx) = channel::bounded(1);
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Err(K17Error::ConnectionLost);
            }
            state.pending = Some(PendingRequest {
                ticket,
                command: command.code(),
                expected_prefix: command.prefix().ack_for(),
                submitted_at: Instant::now(),
                completion: tx,
            });
        }

        let frame = encode_command(command);
        tracing::debug!(
            "Sending {} ({})",
            command.name(),
            String::from_utf8_lossy(&frame)
        );

        if let Err(e) = sink.write_frame(&frame) {
            tracing::warn!("Write of {} failed: {}", command.name(), e);
            self.clear_pending(ticket);
            return Err(K17Error::ConnectionLost);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.clear_pending(ticket) {
                    tracing::warn!("{} timed out after {:?}", command.name(), self.timeout);
                    Err(K17Error::Timeout {
                        command: command.code(),
                    })
                } else {
                    // Resolved between the timeout and taking the lock
                    rx.try_recv().unwrap_or(Err(K17Error::ConnectionLost))
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(K17Error::ConnectionLost),
        }
    }

    /// Remove the pending request if it still belongs to `ticket`
    fn clear_pending(&self, ticket: u64) -> bool {
        let mut state = self.state.lock();
        if state.pending.as_ref().map_or(false, |p| p.ticket == ticket) {
            state.pending = None;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
