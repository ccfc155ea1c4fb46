//! Frame Reader Tests
//!
//! Splitting the incoming character stream into messages.

use k17link::protocol::{FrameReader, PayloadEncoding, Prefix};
use k17link::{DeviceSettings, K17Error};

fn settings_frame(volume: u16) -> String {
    format!(
        r#"a501009c{{"currentVolume":{},"gaplessPlay":true,"usbAudio":1}}"#,
        volume
    )
}

// =============================================================================
// Splitting Tests
// =============================================================================

#[test]
fn test_push_and_ack_in_one_read() {
    let mut reader = FrameReader::new();
    reader.push(b"a60a000c000ca502000c0025");

    let messages: Vec<_> = reader.drain().into_iter().map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 2);

    assert_eq!(messages[0].prefix, Prefix::Push);
    assert_eq!(messages[0].command, 0x0a);
    assert_eq!(messages[1].prefix, Prefix::Ack);
    assert_eq!(messages[1].volume(), Some(37));
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_frame_split_across_reads() {
    let mut reader = FrameReader::new();
    reader.push(b"a502");
    assert!(reader.drain().is_empty());
    reader.push(b"000c00");
    assert!(reader.drain().is_empty());
    reader.push(b"25");

    let messages = reader.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].as_ref().unwrap().volume(), Some(37));
}

#[test]
fn test_settings_json_frame() {
    let mut reader = FrameReader::new();
    reader.push(settings_frame(42).as_bytes());

    let msg = reader.next_frame().unwrap().unwrap();
    assert_eq!(msg.command, 0x01);
    assert_eq!(msg.encoding, PayloadEncoding::Text);

    let settings = DeviceSettings::from_json(msg.text().unwrap()).unwrap();
    assert_eq!(settings.current_volume.get(), 42);
    assert_eq!(settings.gapless_play, Some(true));
}

#[test]
fn test_settings_json_split_then_push() {
    let frame = settings_frame(10);
    let (head, tail) = frame.split_at(20);

    let mut reader = FrameReader::new();
    reader.push(head.as_bytes());
    assert!(reader.next_frame().is_none());

    reader.push(tail.as_bytes());
    reader.push(b"a502000c000b");

    let messages: Vec<_> = reader.drain().into_iter().map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].encoding, PayloadEncoding::Text);
    assert_eq!(messages[1].volume(), Some(11));
}

// =============================================================================
// Error Recovery Tests
// =============================================================================

#[test]
fn test_resync_after_garbage() {
    let mut reader = FrameReader::new();
    reader.push(b"zz0502000c0025");

    let first = reader.next_frame().unwrap();
    assert!(matches!(first, Err(K17Error::MalformedEncoding(_))));

    let second = reader.next_frame().unwrap().unwrap();
    assert_eq!(second.prefix, Prefix::Request);
    assert_eq!(second.command, 0x02);
    assert!(reader.next_frame().is_none());
}

#[test]
fn test_unknown_hex_prefix_is_frame_error() {
    let mut reader = FrameReader::new();
    reader.push(b"ffa502000c0025");

    assert!(matches!(
        reader.next_frame().unwrap(),
        Err(K17Error::FrameDecode(_))
    ));
    assert_eq!(reader.next_frame().unwrap().unwrap().volume(), Some(37));
}

#[test]
fn test_unusable_length_takes_rest_of_read() {
    let mut reader = FrameReader::new();
    // Declared length 3 is below the header size
    reader.push(b"a50b00030102");

    let msg = reader.next_frame().unwrap().unwrap();
    assert_eq!(msg.command, 0x0b);
    assert_eq!(&msg.raw_payload[..], &[0x01, 0x02]);
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_reader_usable_after_error() {
    let mut reader = FrameReader::new();
    reader.push(b"!!");
    assert!(reader.next_frame().unwrap().is_err());

    reader.push(b"a60a000c000c");
    let msg = reader.next_frame().unwrap().unwrap();
    assert_eq!(msg.command, 0x0a);
}

#[test]
fn test_bogus_length_overtaken_by_next_read() {
    let mut reader = FrameReader::new();
    // Aux push whose length field is not a character count
    reader.push(b"a6270ffe0001");
    assert!(reader.drain().is_empty());

    reader.push(b"a502000c0021");
    let messages: Vec<_> = reader.drain().into_iter().map(|m| m.unwrap()).collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].prefix, Prefix::Push);
    assert_eq!(messages[0].command, 0x27);
    assert_eq!(messages[1].volume(), Some(33));
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_undecodable_overtaken_span_reported() {
    let mut reader = FrameReader::new();
    reader.push(b"a6390ffe00z");
    assert!(reader.drain().is_empty());

    reader.push(b"a60a000c000c");
    let items = reader.drain();
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Err(K17Error::MalformedEncoding(_))));
    assert_eq!(items[1].as_ref().unwrap().command, 0x0a);
}

#[test]
fn test_invalid_json_payload_dropped() {
    let mut reader = FrameReader::new();
    reader.push(b"a501009c{oops}a502000c0025");

    let items = reader.drain();
    assert!(items[0].is_err());
    assert_eq!(items.last().unwrap().as_ref().unwrap().volume(), Some(37));
}
