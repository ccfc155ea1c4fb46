//! Event Bus Tests
//!
//! Fan-out, ordering, filtering and callback delivery.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel;
use parking_lot::Mutex;

use k17link::events::PushEventBus;
use k17link::protocol::{Message, PayloadEncoding, Prefix};
use k17link::{DeviceEvent, SessionState};

fn knob(volume: u16) -> Message {
    Message::new(
        Prefix::Ack,
        0x02,
        Bytes::copy_from_slice(&volume.to_be_bytes()),
        PayloadEncoding::Hex,
    )
}

#[test]
fn test_every_subscriber_sees_publish_order() {
    let bus = PushEventBus::new(16);
    let (_a, rx_a) = bus.subscribe();
    let (_b, rx_b) = bus.subscribe();

    for v in [3, 1, 2] {
        bus.publish(DeviceEvent::VolumeChanged(v));
    }

    let expected: Vec<_> = [3, 1, 2].into_iter().map(DeviceEvent::VolumeChanged).collect();
    assert_eq!(rx_a.try_iter().collect::<Vec<_>>(), expected);
    assert_eq!(rx_b.try_iter().collect::<Vec<_>>(), expected);
}

#[test]
fn test_knob_push_yields_volume_then_raw() {
    let bus = PushEventBus::new(16);
    let (_id, rx) = bus.subscribe();

    bus.publish_push(&knob(55));

    assert_eq!(rx.try_recv().unwrap(), DeviceEvent::VolumeChanged(55));
    match rx.try_recv().unwrap() {
        DeviceEvent::Push(push) => {
            assert_eq!(push.command, 0x02);
            assert_eq!(&push.payload[..], &[0x00, 55]);
        }
        other => panic!("Expected push, got {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_notify_push_has_no_volume_event() {
    let bus = PushEventBus::new(16);
    let (_id, rx) = bus.subscribe();

    let notify = Message::new(
        Prefix::Push,
        0x0a,
        Bytes::from_static(&[0x00, 0x0c]),
        PayloadEncoding::Hex,
    );
    bus.publish_push(&notify);

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DeviceEvent::Push(p) if p.command == 0x0a));
}

#[test]
fn test_filtered_channel_subscription() {
    let bus = PushEventBus::new(16);
    let (_id, rx) = bus.subscribe_where(|e| matches!(e, DeviceEvent::StateChanged(_)));

    bus.publish(DeviceEvent::VolumeChanged(1));
    bus.publish(DeviceEvent::StateChanged(SessionState::Ready));
    bus.publish(DeviceEvent::FrameError("junk".to_string()));

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(events, vec![DeviceEvent::StateChanged(SessionState::Ready)]);
}

#[test]
fn test_callback_delivery_in_order() {
    let bus = PushEventBus::new(16);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = channel::bounded(1);

    let sink = Arc::clone(&seen);
    bus.subscribe_fn(move |event| {
        if let DeviceEvent::VolumeChanged(v) = event {
            let mut seen = sink.lock();
            seen.push(v);
            if seen.len() == 5 {
                let _ = done_tx.send(());
            }
        }
    })
    .unwrap();

    for v in 10..15 {
        bus.publish(DeviceEvent::VolumeChanged(v));
    }

    done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(*seen.lock(), vec![10, 11, 12, 13, 14]);
}

#[test]
fn test_slow_callback_does_not_block_publisher() {
    let bus = PushEventBus::new(2);
    let (release_tx, release_rx) = channel::bounded::<()>(0);

    bus.subscribe_fn(move |_| {
        let _ = release_rx.recv_timeout(Duration::from_secs(2));
    })
    .unwrap();
    let (_id, rx) = bus.subscribe();

    // Far more than the stuck subscriber can queue
    for v in 0..50 {
        bus.publish(DeviceEvent::VolumeChanged(v));
    }

    // The channel subscriber kept the first events, the rest were dropped
    let got: Vec<_> = rx.try_iter().collect();
    assert_eq!(
        got,
        vec![DeviceEvent::VolumeChanged(0), DeviceEvent::VolumeChanged(1)]
    );
    drop(release_tx);
}

#[test]
fn test_unsubscribed_callback_stops_receiving() {
    let bus = PushEventBus::new(16);
    let count = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&count);
    let id = bus
        .subscribe_filtered(
            |e| matches!(e, DeviceEvent::VolumeChanged(_)),
            move |_| *counter.lock() += 1,
        )
        .unwrap();
    assert_eq!(bus.subscriber_count(), 1);

    assert!(bus.unsubscribe(id));
    bus.publish(DeviceEvent::VolumeChanged(9));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(*count.lock(), 0);
    assert_eq!(bus.subscriber_count(), 0);
}
