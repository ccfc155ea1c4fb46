//! Command definitions
//!
//! Represents commands sent to the device and the prefix byte that
//! starts every frame.

/// First byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Prefix {
    /// Client request
    Request = 0x05,

    /// Alternate client request (used by the auxiliary commands)
    RequestAlt = 0x06,

    /// Device response to a request
    Ack = 0xa5,

    /// Unsolicited device notification
    Push = 0xa6,
}

impl Prefix {
    /// Map a raw byte to a known prefix
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x05 => Some(Prefix::Request),
            0x06 => Some(Prefix::RequestAlt),
            0xa5 => Some(Prefix::Ack),
            0xa6 => Some(Prefix::Push),
            _ => None,
        }
    }

    /// The prefix the device answers a request prefix with
    pub fn ack_for(self) -> Prefix {
        match self {
            Prefix::Request | Prefix::Ack => Prefix::Ack,
            Prefix::RequestAlt | Prefix::Push => Prefix::Push,
        }
    }
}

/// Command bytes with known meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    GetSettings = 0x01,
    SetVolume = 0x02,
    Notify = 0x0a,
    Init = 0x99,
}

/// A command to send to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Session opener, first handshake step
    Init,

    /// Fetch the settings JSON (second handshake step, also the health check)
    GetSettings,

    /// Set the output volume (0-100)
    SetVolume { volume: u16 },

    /// Any other command; payload is passed through untouched
    Raw {
        prefix: Prefix,
        command: u8,
        payload: Vec<u8>,
    },
}

impl Command {
    /// Prefix byte for this command
    pub fn prefix(&self) -> Prefix {
        match self {
            Command::Raw { prefix, .. } => *prefix,
            _ => Prefix::Request,
        }
    }

    /// Command byte
    pub fn code(&self) -> u8 {
        match self {
            Command::Init => CommandType::Init as u8,
            Command::GetSettings => CommandType::GetSettings as u8,
            Command::SetVolume { .. } => CommandType::SetVolume as u8,
            Command::Raw { command, .. } => *command,
        }
    }

    /// Payload bytes that follow the header
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Command::Init => vec![0x00, 0x00],
            Command::GetSettings => Vec::new(),
            Command::SetVolume { volume } => volume.to_be_bytes().to_vec(),
            Command::Raw { payload, .. } => payload.clone(),
        }
    }

    /// Human-readable name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "INIT",
            Command::GetSettings => "GET_SETTINGS",
            Command::SetVolume { .. } => "SET_VOLUME",
            Command::Raw { .. } => "RAW",
        }
    }
}
