//! Connection Handler
//!
//! Owns the TCP socket to the device. The write half is shared behind a
//! mutex so every frame goes out as one uninterrupted write; the read half
//! is handed to the session's reader thread.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{K17Error, Result};

/// A live TCP connection to the device
pub struct Connection {
    /// Write half (serialized)
    writer: Mutex<TcpStream>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Dial `addr`, trying each resolved address within `connect_timeout`
    ///
    /// Returns the connection plus a cloned stream for the reader thread.
    pub fn open(addr: &str, connect_timeout: Duration, write_timeout: Duration) -> Result<(Self, TcpStream)> {
        let candidates: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        if candidates.is_empty() {
            return Err(K17Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve", addr),
            )));
        }

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream, write_timeout),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(K17Error::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no address reachable")
        })))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, write_timeout: Duration) -> Result<(Self, TcpStream)> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Frames are tiny; send them immediately
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(write_timeout))?;

        let read_stream = stream.try_clone()?;
        Ok((
            Self {
                writer: Mutex::new(stream),
                peer_addr,
            },
            read_stream,
        ))
    }

    /// Write one complete frame
    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(frame)?;
        writer.flush()
    }

    /// Close both directions; unblocks the reader thread
    pub fn shutdown(&self) {
        let writer = self.writer.lock();
        if let Err(e) = writer.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                tracing::debug!("Shutdown of {} failed: {}", self.peer_addr, e);
            }
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Describe a read error the way the logs report connection loss
pub(crate) fn describe_read_error(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => "connection closed by device".to_string(),
        io::ErrorKind::ConnectionReset => "connection reset by device".to_string(),
        io::ErrorKind::ConnectionAborted => "connection aborted".to_string(),
        // Windows reports read timeouts as TimedOut instead of WouldBlock
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => "read timed out".to_string(),
        _ => format!("read error: {}", err),
    }
}
