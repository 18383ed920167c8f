//! Portal command protocol
//!
//! The host drives the portal with short frames on the interrupt OUT
//! endpoint. The first byte is an ASCII opcode; the rest is an
//! opcode-specific payload. Replies travel on the interrupt IN endpoint as
//! fixed 32-byte frames that echo the opcode in byte 0.
//!
//! # Frame Format
//!
//! ```text
//! request:  [opcode: u8][payload: 0..=255 bytes]
//! response: [opcode: u8][payload: 31 bytes, zero padded]
//! ```
//!
//! Decoding is lenient: an empty frame, an unknown opcode, or a frame
//! shorter than its opcode's minimum length decodes to `None` and must be
//! ignored by the caller without a reply.

/// Number of tag slots the portal exposes
pub const MAX_SLOTS: usize = 2;

/// Size of one addressable tag block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Every response frame is padded to this length
pub const RESPONSE_LEN: usize = 32;

/// Largest request frame read from the OUT endpoint
pub const MAX_REQUEST_LEN: usize = 256;

/// Query byte selecting slot 0
pub const SLOT_QUERY_FIRST: u8 = 0x20;

/// Query byte selecting slot 1
pub const SLOT_QUERY_SECOND: u8 = 0x21;

/// Trailer appended to every sense report after the presence mask
pub const SENSE_TRAILER: [u8; 2] = [0x00, 0x01];

/// Fixed diagnostic bytes returned by the restart command
const RESTART_PAYLOAD: [u8; 4] = [0x02, 0x0A, 0x05, 0x08];

/// Reply payload of the activate command
const ACTIVATE_PAYLOAD: [u8; 3] = [0x01, 0xFF, 0x77];

/// Command opcodes understood by the portal
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `A` - activate the portal
    Activate = 0x41,
    /// `C` - set the main LED colour
    SetLed = 0x43,
    /// `J` - query, answered with an empty frame
    Query = 0x4A,
    /// `L` - side LED control (never answered)
    SideLed = 0x4C,
    /// `M` - speaker enable/disable
    Speaker = 0x4D,
    /// `Q` - read one tag block
    Read = 0x51,
    /// `R` - shutdown/restart
    Restart = 0x52,
    /// `S` - sense which slots hold a tag
    Sense = 0x53,
    /// `V` - undocumented, answered with an empty frame
    V = 0x56,
    /// `W` - write one tag block
    Write = 0x57,
}

impl Opcode {
    /// Map an opcode byte to a known opcode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x41 => Some(Self::Activate),
            0x43 => Some(Self::SetLed),
            0x4A => Some(Self::Query),
            0x4C => Some(Self::SideLed),
            0x4D => Some(Self::Speaker),
            0x51 => Some(Self::Read),
            0x52 => Some(Self::Restart),
            0x53 => Some(Self::Sense),
            0x56 => Some(Self::V),
            0x57 => Some(Self::Write),
            _ => None,
        }
    }

    /// Minimum frame length (opcode byte included) for this opcode
    pub fn min_frame_len(self) -> usize {
        match self {
            Self::SetLed => 4,
            Self::SideLed => 5,
            Self::Speaker => 2,
            Self::Read => 3,
            Self::Write => 3 + BLOCK_SIZE,
            Self::Activate | Self::Query | Self::Restart | Self::Sense | Self::V => 1,
        }
    }
}

/// Map a slot query byte to a slot index
///
/// `0x20` selects slot 0 and `0x21` selects slot 1. Every other value falls
/// back to slot 1; host software has been observed to rely on this.
pub fn slot_from_query(query: u8) -> usize {
    match query {
        SLOT_QUERY_FIRST => 0,
        SLOT_QUERY_SECOND => 1,
        _ => 1,
    }
}

/// A decoded portal command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Activate,
    SetLed { red: u8, green: u8, blue: u8 },
    Query,
    SideLed { side: u8 },
    Speaker { enable: bool },
    ReadBlock { slot: usize, block: u8 },
    Restart,
    Sense,
    V,
    WriteBlock { slot: usize, block: u8, data: [u8; BLOCK_SIZE] },
}

impl Command {
    /// Decode one request frame
    ///
    /// Returns `None` for frames that must be dropped silently.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let opcode = Opcode::from_u8(*frame.first()?)?;
        if frame.len() < opcode.min_frame_len() {
            return None;
        }

        let command = match opcode {
            Opcode::Activate => Self::Activate,
            Opcode::SetLed => Self::SetLed {
                red: frame[1],
                green: frame[2],
                blue: frame[3],
            },
            Opcode::Query => Self::Query,
            Opcode::SideLed => Self::SideLed { side: frame[1] },
            Opcode::Speaker => Self::Speaker {
                enable: frame[1] > 0,
            },
            Opcode::Read => Self::ReadBlock {
                slot: slot_from_query(frame[1]),
                block: frame[2],
            },
            Opcode::Restart => Self::Restart,
            Opcode::Sense => Self::Sense,
            Opcode::V => Self::V,
            Opcode::Write => {
                let mut data = [0u8; BLOCK_SIZE];
                data.copy_from_slice(&frame[3..3 + BLOCK_SIZE]);
                Self::WriteBlock {
                    slot: slot_from_query(frame[1]),
                    block: frame[2],
                    data,
                }
            }
        };

        Some(command)
    }

    /// Opcode this command was decoded from
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Activate => Opcode::Activate,
            Self::SetLed { .. } => Opcode::SetLed,
            Self::Query => Opcode::Query,
            Self::SideLed { .. } => Opcode::SideLed,
            Self::Speaker { .. } => Opcode::Speaker,
            Self::ReadBlock { .. } => Opcode::Read,
            Self::Restart => Opcode::Restart,
            Self::Sense => Opcode::Sense,
            Self::V => Opcode::V,
            Self::WriteBlock { .. } => Opcode::Write,
        }
    }
}

/// A 32-byte response frame for the interrupt IN endpoint
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame([u8; RESPONSE_LEN]);

impl ResponseFrame {
    /// An all-zero frame carrying only the opcode
    pub fn empty(opcode: Opcode) -> Self {
        let mut bytes = [0u8; RESPONSE_LEN];
        bytes[0] = opcode as u8;
        Self(bytes)
    }

    /// A frame carrying the opcode followed by `payload`
    ///
    /// Payload bytes beyond the frame's 31 free bytes are dropped.
    pub fn with_payload(opcode: Opcode, payload: &[u8]) -> Self {
        let mut frame = Self::empty(opcode);
        let len = payload.len().min(RESPONSE_LEN - 1);
        frame.0[1..1 + len].copy_from_slice(&payload[..len]);
        frame
    }

    /// Reply to the activate command
    pub fn activate() -> Self {
        Self::with_payload(Opcode::Activate, &ACTIVATE_PAYLOAD)
    }

    /// Reply to the restart command
    pub fn restart() -> Self {
        Self::with_payload(Opcode::Restart, &RESTART_PAYLOAD)
    }

    /// Sense report for a slot presence bitmask
    ///
    /// Bit `i` of `mask` is set when slot `i` holds a tag.
    pub fn sense(mask: u32) -> Self {
        let mut payload = [0u8; 6];
        payload[..4].copy_from_slice(&mask.to_le_bytes());
        payload[4..].copy_from_slice(&SENSE_TRAILER);
        Self::with_payload(Opcode::Sense, &payload)
    }

    /// Reply carrying one tag block: `[0x10 + slot, block, data..]`
    pub fn block(opcode: Opcode, slot: usize, block: u8, data: &[u8; BLOCK_SIZE]) -> Self {
        let mut frame = Self::empty(opcode);
        frame.0[1] = 0x10 + slot as u8;
        frame.0[2] = block;
        frame.0[3..3 + BLOCK_SIZE].copy_from_slice(data);
        frame
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; RESPONSE_LEN] {
        &self.0
    }

    /// Opcode byte echoed in this frame
    pub fn opcode_byte(&self) -> u8 {
        self.0[0]
    }
}

impl std::fmt::Debug for ResponseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResponseFrame({:#04x}, {:02x?})", self.0[0], &self.0[1..])
    }
}
