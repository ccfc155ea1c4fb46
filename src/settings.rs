//! Device settings and the volume model
//!
//! Settings arrive as JSON in the GET_SETTINGS ack. Only `currentVolume`
//! is interpreted; every other key is carried through as received.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{K17Error, Result};

/// Highest volume step the device accepts
pub const MAX_VOLUME: u16 = 100;

/// Output volume, an integer in `[0, 100]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Volume(u16);

impl Volume {
    pub const MIN: Volume = Volume(0);
    pub const MAX: Volume = Volume(MAX_VOLUME);

    /// Validate a raw level
    pub fn new(level: u16) -> Result<Self> {
        if level > MAX_VOLUME {
            return Err(K17Error::InvalidVolume(level));
        }
        Ok(Volume(level))
    }

    /// Clamp any level into range
    pub fn saturating(level: i32) -> Self {
        Volume(level.clamp(0, MAX_VOLUME as i32) as u16)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Level as a `[0.0, 1.0]` fraction
    pub fn as_fraction(self) -> f32 {
        self.0 as f32 / MAX_VOLUME as f32
    }

    /// Nearest level for a `[0.0, 1.0]` fraction; out-of-range input is clamped
    pub fn from_fraction(fraction: f32) -> Self {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction };
        Volume::saturating((fraction * MAX_VOLUME as f32).round() as i32)
    }

    /// One step up or down, clamped
    pub fn step(self, delta: i32) -> Self {
        Volume::saturating(self.0 as i32 + delta)
    }
}

impl TryFrom<u16> for Volume {
    type Error = K17Error;

    fn try_from(level: u16) -> Result<Self> {
        Volume::new(level)
    }
}

impl From<Volume> for u16 {
    fn from(volume: Volume) -> u16 {
        volume.0
    }
}

impl std::fmt::Display for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings reported by the device
///
/// Known keys get typed fields; unknown keys land in `extra` so the object
/// serializes back with everything the device sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    #[serde(deserialize_with = "normalize_volume")]
    pub current_volume: Volume,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_volume: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_jump: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gapless_play: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_play: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_mode: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_gain: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usb_audio: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Device values above 100 are clamped rather than rejected
fn normalize_volume<'de, D>(deserializer: D) -> std::result::Result<Volume, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(Volume::saturating(raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32))
}

impl DeviceSettings {
    /// Parse the JSON text of a GET_SETTINGS ack
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Settings as a flat JSON object, the way the device sent them
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
