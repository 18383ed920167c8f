//! Control endpoint (ep0) handling
//!
//! FunctionFS reports bus activity on `ep0` as fixed-size event records.
//! `SETUP` events carry the 8-byte setup packet of a control transfer that
//! the kernel could not answer on its own; everything HID-specific lands
//! here. [`handle_setup`] is a pure dispatcher: it maps a setup packet to a
//! [`ControlReply`] and leaves the actual `ep0` write to the caller.

use crate::descriptors::{DT_HID, DT_REPORT, HID_REPORT_DESCRIPTOR, hid_class_descriptor};
use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian};

/// `bmRequestType` type bits
pub const TYPE_MASK: u8 = 0x60;
pub const TYPE_STANDARD: u8 = 0x00;
pub const TYPE_CLASS: u8 = 0x20;
pub const TYPE_VENDOR: u8 = 0x40;

/// `bmRequestType` direction bit (device-to-host)
pub const DIR_IN: u8 = 0x80;

/// Standard request codes
pub const REQ_GET_STATUS: u8 = 0x00;
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;
pub const REQ_GET_CONFIGURATION: u8 = 0x08;
pub const REQ_SET_CONFIGURATION: u8 = 0x09;
pub const REQ_GET_INTERFACE: u8 = 0x0A;
pub const REQ_SET_INTERFACE: u8 = 0x0B;

/// HID class request codes
pub const HID_GET_REPORT: u8 = 0x01;
pub const HID_GET_PROTOCOL: u8 = 0x03;
pub const HID_SET_REPORT: u8 = 0x09;
pub const HID_SET_IDLE: u8 = 0x0A;
pub const HID_SET_PROTOCOL: u8 = 0x0B;

/// First byte of the canned GET_REPORT reply
pub const GET_REPORT_SENTINEL: u8 = 0x53;

/// Length of the canned GET_REPORT reply before truncation
const GET_REPORT_LEN: usize = 32;

/// Request category encoded in `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// USB control setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupRequest {
    pub const LEN: usize = 8;

    /// Decode a little-endian setup packet
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::LEN,
                available: bytes.len(),
            });
        }

        Ok(Self {
            request_type: bytes[0],
            request: bytes[1],
            value: LittleEndian::read_u16(&bytes[2..4]),
            index: LittleEndian::read_u16(&bytes[4..6]),
            length: LittleEndian::read_u16(&bytes[6..8]),
        })
    }

    pub fn kind(&self) -> RequestKind {
        match self.request_type & TYPE_MASK {
            TYPE_STANDARD => RequestKind::Standard,
            TYPE_CLASS => RequestKind::Class,
            TYPE_VENDOR => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    pub fn is_device_to_host(&self) -> bool {
        self.request_type & DIR_IN != 0
    }

    /// Descriptor type requested by GET_DESCRIPTOR (high byte of `wValue`)
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }
}

/// FunctionFS event record delivered on `ep0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfsEvent {
    Bind,
    Unbind,
    Enable,
    Disable,
    Setup(SetupRequest),
    Suspend,
    Resume,
}

impl FfsEvent {
    /// `sizeof(struct usb_functionfs_event)`: 8-byte union, type, 3 pad bytes
    pub const RECORD_LEN: usize = 12;

    /// Decode one event record
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::RECORD_LEN {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::RECORD_LEN,
                available: bytes.len(),
            });
        }

        match bytes[8] {
            0 => Ok(Self::Bind),
            1 => Ok(Self::Unbind),
            2 => Ok(Self::Enable),
            3 => Ok(Self::Disable),
            4 => Ok(Self::Setup(SetupRequest::parse(&bytes[..SetupRequest::LEN])?)),
            5 => Ok(Self::Suspend),
            6 => Ok(Self::Resume),
            other => Err(ProtocolError::UnknownEventType(other)),
        }
    }
}

/// What to do on `ep0` in answer to a setup packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Data stage payload
    Data(Vec<u8>),
    /// Zero-length status acknowledgment
    Ack,
    /// Write nothing; the request ends in a stall
    Stall,
}

/// Answer a setup packet delivered by FunctionFS
pub fn handle_setup(setup: &SetupRequest) -> ControlReply {
    match setup.kind() {
        RequestKind::Standard => handle_standard(setup),
        RequestKind::Class => handle_class(setup),
        RequestKind::Vendor | RequestKind::Reserved => ControlReply::Stall,
    }
}

fn handle_standard(setup: &SetupRequest) -> ControlReply {
    match setup.request {
        REQ_GET_DESCRIPTOR => match setup.descriptor_type() {
            DT_HID => truncated(&hid_class_descriptor().to_bytes(), setup.length),
            DT_REPORT => truncated(&HID_REPORT_DESCRIPTOR, setup.length),
            _ => ControlReply::Stall,
        },
        REQ_GET_STATUS => ControlReply::Data(vec![0x00, 0x00]),
        REQ_SET_CONFIGURATION | REQ_SET_INTERFACE => ControlReply::Ack,
        REQ_GET_CONFIGURATION => ControlReply::Data(vec![0x01]),
        REQ_GET_INTERFACE => ControlReply::Data(vec![0x00]),
        _ => ControlReply::Stall,
    }
}

fn handle_class(setup: &SetupRequest) -> ControlReply {
    match setup.request {
        HID_GET_REPORT => {
            let mut report = [0u8; GET_REPORT_LEN];
            report[0] = GET_REPORT_SENTINEL;
            truncated(&report, setup.length)
        }
        HID_SET_REPORT | HID_SET_IDLE | HID_SET_PROTOCOL => ControlReply::Ack,
        HID_GET_PROTOCOL => ControlReply::Data(vec![0x01]),
        _ => ControlReply::Stall,
    }
}

/// Clip a reply to the host's `wLength`; an empty result is an acknowledgment
fn truncated(bytes: &[u8], length: u16) -> ControlReply {
    let len = bytes.len().min(length as usize);
    if len == 0 {
        ControlReply::Ack
    } else {
        ControlReply::Data(bytes[..len].to_vec())
    }
}
