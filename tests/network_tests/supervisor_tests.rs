//! Supervisor Tests
//!
//! Automatic reconnect against a scripted device, with millisecond backoff.

#[path = "../common/fake_device.rs"]
mod fake_device;

use std::thread;
use std::time::Duration;

use fake_device::{wait_until, FakeDevice};
use k17link::{BackoffConfig, Config, ReconnectSupervisor, Session, SessionState};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(device: &FakeDevice) -> Config {
    Config::builder()
        .host("127.0.0.1")
        .port(device.port())
        .connect_timeout(Duration::from_secs(1))
        .request_timeout(Duration::from_millis(300))
        .backoff(BackoffConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2,
            stability_window: Duration::from_secs(60),
        })
        .build()
}

#[test]
fn test_supervisor_makes_first_connection() {
    let device = FakeDevice::start(30);
    let session = Session::new(fast_config(&device)).unwrap();

    let supervisor = ReconnectSupervisor::start(session.clone()).unwrap();
    assert!(supervisor.is_running());
    assert!(wait_until(WAIT, || session.is_ready()));
    assert_eq!(session.volume(), Some(30));

    supervisor.stop();
}

#[test]
fn test_reconnects_after_device_drop() {
    let device = FakeDevice::start(30);
    let session = Session::new(fast_config(&device)).unwrap();
    session.connect().unwrap();
    let _supervisor = ReconnectSupervisor::start(session.clone()).unwrap();

    device.set_volume(31);
    device.drop_clients();

    assert!(wait_until(WAIT, || {
        device.connection_count() == 2 && session.is_ready()
    }));
    assert_eq!(session.volume(), Some(31));
    assert_eq!(session.set_volume(32).unwrap(), 32);
}

#[test]
fn test_keeps_retrying_until_device_returns() {
    let device = FakeDevice::start(30);
    let session = Session::new(fast_config(&device)).unwrap();
    session.connect().unwrap();
    let _supervisor = ReconnectSupervisor::start(session.clone()).unwrap();

    device.refuse_connections(true);
    device.drop_clients();
    assert!(wait_until(WAIT, || session.state() == SessionState::Disconnected));

    // Several refused attempts go by
    thread::sleep(Duration::from_millis(200));
    assert!(!session.is_ready());

    device.refuse_connections(false);
    assert!(wait_until(WAIT, || session.is_ready()));
    assert_eq!(device.connection_count(), 2);
}

#[test]
fn test_no_reconnect_after_disconnect() {
    let device = FakeDevice::start(30);
    let session = Session::new(fast_config(&device)).unwrap();
    session.connect().unwrap();
    let _supervisor = ReconnectSupervisor::start(session.clone()).unwrap();

    session.disconnect();
    thread::sleep(Duration::from_millis(300));

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(device.connection_count(), 1);
}

#[test]
fn test_stopped_supervisor_does_not_reconnect() {
    let device = FakeDevice::start(30);
    let session = Session::new(fast_config(&device)).unwrap();
    session.connect().unwrap();

    let supervisor = ReconnectSupervisor::start(session.clone()).unwrap();
    supervisor.stop();

    device.drop_clients();
    assert!(wait_until(WAIT, || session.state() == SessionState::Disconnected));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(device.connection_count(), 1);
}
