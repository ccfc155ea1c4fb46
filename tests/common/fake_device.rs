//! Scripted stand-in for a K17 on a loopback port
//!
//! Answers INIT, GET_SETTINGS and SET_VOLUME the way the device does, and
//! lets a test inject pushes, silence commands, or drop connections.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use k17link::protocol::{encode_hex, FrameReader, Message, Prefix};

#[derive(Default)]
struct Shared {
    volume: Mutex<u16>,

    /// Commands the device never answers
    silent: Mutex<HashSet<u8>>,

    /// Text written in the same write as the next ack
    prepend: Mutex<String>,

    /// Volume echoed for SET_VOLUME instead of the requested one
    echo_override: Mutex<Option<u16>>,

    /// Close new connections right after accepting them
    refuse: AtomicBool,

    clients: Mutex<Vec<TcpStream>>,
    connections: AtomicUsize,
    received: Mutex<Vec<String>>,
    stop: AtomicBool,
}

pub struct FakeDevice {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl FakeDevice {
    pub fn start(volume: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake device");
        let addr = listener.local_addr().expect("local addr");
        let shared = Arc::new(Shared::default());
        *shared.volume.lock() = volume;

        let accept_shared = Arc::clone(&shared);
        let acceptor = thread::spawn(move || accept_loop(listener, accept_shared));

        Self {
            addr,
            shared,
            acceptor: Some(acceptor),
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn volume(&self) -> u16 {
        *self.shared.volume.lock()
    }

    pub fn set_volume(&self, volume: u16) {
        *self.shared.volume.lock() = volume;
    }

    /// Stop answering `command`
    pub fn silence(&self, command: u8) {
        self.shared.silent.lock().insert(command);
    }

    pub fn unsilence(&self, command: u8) {
        self.shared.silent.lock().remove(&command);
    }

    /// Send `text` in the same TCP write as the next ack, ahead of it
    pub fn prepend_to_next_ack(&self, text: &str) {
        self.shared.prepend.lock().push_str(text);
    }

    /// Echo `volume` for every SET_VOLUME
    pub fn override_echo(&self, volume: u16) {
        *self.shared.echo_override.lock() = Some(volume);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Write raw text to every connected client
    pub fn push(&self, text: &str) {
        for client in self.shared.clients.lock().iter_mut() {
            let _ = client.write_all(text.as_bytes());
        }
    }

    /// Knob push for `volume`
    pub fn push_volume(&self, volume: u16) {
        self.set_volume(volume);
        self.push(&format!("a502000c{}", encode_hex(&volume.to_be_bytes())));
    }

    /// Close every open connection from the device side
    pub fn drop_clients(&self) {
        for client in self.shared.clients.lock().drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Request frames received so far, as sent
    pub fn received(&self) -> Vec<String> {
        self.shared.received.lock().clone()
    }

    /// Block until `count` requests have arrived
    pub fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.shared.received.lock().len() >= count)
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        // Wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        self.drop_clients();
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn settings_json(volume: u16) -> String {
    format!(
        r#"{{"currentVolume":{},"folderJump":false,"gaplessPlay":true,"maxVolume":100,"memoryPlay":false,"memoryType":0,"playMode":0,"replayGain":0,"usbAudio":1}}"#,
        volume
    )
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }
        let Ok(stream) = stream else { continue };
        if shared.refuse.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            continue;
        }

        shared.connections.fetch_add(1, Ordering::SeqCst);
        if let Ok(clone) = stream.try_clone() {
            shared.clients.lock().push(clone);
        }
        let client_shared = Arc::clone(&shared);
        thread::spawn(move || serve_client(stream, client_shared));
    }
}

fn serve_client(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut frames = FrameReader::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        shared
            .received
            .lock()
            .push(String::from_utf8_lossy(&buf[..n]).into_owned());

        frames.push(&buf[..n]);
        for request in frames.drain().into_iter().flatten() {
            if let Some(reply) = answer(&request, &shared) {
                let mut out = std::mem::take(&mut *shared.prepend.lock());
                out.push_str(&reply);
                if stream.write_all(out.as_bytes()).is_err() {
                    return;
                }
            }
        }
    }
}

fn answer(request: &Message, shared: &Shared) -> Option<String> {
    if shared.silent.lock().contains(&request.command) {
        return None;
    }
    let ack = match request.prefix {
        Prefix::Request => "a5",
        Prefix::RequestAlt => "a6",
        _ => return None,
    };

    match request.command {
        0x99 => Some("a599000c0302".to_string()),
        0x01 => Some(format!("a501009c{}", settings_json(*shared.volume.lock()))),
        0x02 => {
            let requested = match &request.raw_payload[..] {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                _ => return None,
            };
            let echoed = shared.echo_override.lock().unwrap_or(requested);
            *shared.volume.lock() = echoed;
            Some(format!("a502000c{}", encode_hex(&echoed.to_be_bytes())))
        }
        command => {
            // Echo anything else back with the ack prefix
            let len = (8 + request.raw_payload.len() * 2) as u16;
            Some(format!(
                "{}{}{}{}",
                ack,
                encode_hex(&[command]),
                encode_hex(&len.to_be_bytes()),
                encode_hex(&request.raw_payload)
            ))
        }
    }
}
