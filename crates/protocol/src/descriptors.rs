//! FunctionFS descriptor and string blobs
//!
//! A FunctionFS function is described to the kernel by writing two blobs to
//! `ep0` before anything else: a descriptor blob and a string blob. Both
//! start with a little-endian header whose `length` field must equal the
//! size of the whole blob.
//!
//! # Descriptor Blob Layout (v2)
//!
//! ```text
//! magic: u32 = 3 | length: u32 | flags: u32 (HAS_FS_DESC | HAS_HS_DESC)
//! fs_count: u32 = 4 | hs_count: u32 = 4
//! full-speed:  interface(9) hid(9) ep_in(7) ep_out(7)
//! high-speed:  interface(9) hid(9) ep_in(7) ep_out(7)
//! ```
//!
//! # String Blob Layout
//!
//! ```text
//! magic: u32 = 2 | length: u32 | str_count: u32 = 3 | lang_count: u32 = 1
//! lang: u16 = 0x0409
//! manufacturer[12] product[12] serial[12]   (NUL padded ASCII)
//! ```

use byteorder::{ByteOrder, LittleEndian};

/// `FUNCTIONFS_DESCRIPTORS_MAGIC_V2`
pub const DESCRIPTORS_MAGIC_V2: u32 = 3;

/// `FUNCTIONFS_STRINGS_MAGIC`
pub const STRINGS_MAGIC: u32 = 2;

/// `FUNCTIONFS_HAS_FS_DESC`
pub const HAS_FS_DESC: u32 = 1;

/// `FUNCTIONFS_HAS_HS_DESC`
pub const HAS_HS_DESC: u32 = 2;

/// USB descriptor type codes
pub const DT_INTERFACE: u8 = 0x04;
pub const DT_ENDPOINT: u8 = 0x05;
pub const DT_HID: u8 = 0x21;
pub const DT_REPORT: u8 = 0x22;

/// HID interface class code
pub const CLASS_HID: u8 = 0x03;

/// Interrupt transfer type in `bmAttributes`
pub const ATTR_INTERRUPT: u8 = 0x03;

/// IN endpoint address (EP1 IN)
pub const EP_IN_ADDRESS: u8 = 0x81;

/// OUT endpoint address (EP2 OUT)
pub const EP_OUT_ADDRESS: u8 = 0x02;

/// Max packet size of both interrupt endpoints
pub const MAX_PACKET_SIZE: u16 = 64;

/// bcdHID 1.11
pub const BCD_HID: u16 = 0x0111;

/// US English language id
pub const LANG_EN_US: u16 = 0x0409;

/// Fixed width of each string field in the string blob
pub const STRING_FIELD_LEN: usize = 12;

pub const MANUFACTURER: &str = "Activision";
pub const PRODUCT: &str = "Spyro Porta";
pub const SERIAL: &str = "99B3f9C9E6";

/// Vendor-defined HID report descriptor (64 bytes in, 64 bytes out)
pub const HID_REPORT_DESCRIPTOR: [u8; 29] = [
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01, //       Usage (0x01)
    0xA1, 0x01, //       Collection (Application)
    0x19, 0x01, //         Usage Minimum (0x01)
    0x29, 0x40, //         Usage Maximum (0x40)
    0x15, 0x00, //         Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //         Report Size (8)
    0x95, 0x20, //         Report Count (32)
    0x81, 0x00, //         Input (Data, Array, Absolute)
    0x19, 0x01, //         Usage Minimum (0x01)
    0x29, 0xFF, //         Usage Maximum (0xFF)
    0x91, 0x00, //         Output (Data, Array, Absolute)
    0xC0, //             End Collection
];

/// Standard interface descriptor (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub string_index: u8,
}

impl InterfaceDescriptor {
    pub const LEN: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            Self::LEN as u8,
            DT_INTERFACE,
            self.number,
            self.alternate_setting,
            self.num_endpoints,
            self.class,
            self.subclass,
            self.protocol,
            self.string_index,
        ]
    }
}

/// HID class descriptor declaring a single report descriptor (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidDescriptor {
    pub bcd_hid: u16,
    pub country_code: u8,
    pub report_len: u16,
}

impl HidDescriptor {
    pub const LEN: usize = 9;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = Self::LEN as u8;
        bytes[1] = DT_HID;
        LittleEndian::write_u16(&mut bytes[2..4], self.bcd_hid);
        bytes[4] = self.country_code;
        bytes[5] = 1; // bNumDescriptors
        bytes[6] = DT_REPORT;
        LittleEndian::write_u16(&mut bytes[7..9], self.report_len);
        bytes
    }
}

/// Endpoint descriptor without the audio extension (7 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const LEN: usize = 7;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = Self::LEN as u8;
        bytes[1] = DT_ENDPOINT;
        bytes[2] = self.address;
        bytes[3] = self.attributes;
        LittleEndian::write_u16(&mut bytes[4..6], self.max_packet_size);
        bytes[6] = self.interval;
        bytes
    }
}

/// The descriptors advertised for one bus speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSet {
    pub interface: InterfaceDescriptor,
    pub hid: HidDescriptor,
    pub ep_in: EndpointDescriptor,
    pub ep_out: EndpointDescriptor,
}

impl DescriptorSet {
    /// Number of descriptors in the set, as declared in the blob header
    pub const COUNT: u32 = 4;

    pub const LEN: usize = InterfaceDescriptor::LEN
        + HidDescriptor::LEN
        + EndpointDescriptor::LEN
        + EndpointDescriptor::LEN;

    /// The portal's only descriptor set; full and high speed are identical
    pub fn portal() -> Self {
        let endpoint = |address| EndpointDescriptor {
            address,
            attributes: ATTR_INTERRUPT,
            max_packet_size: MAX_PACKET_SIZE,
            interval: 1,
        };

        Self {
            interface: InterfaceDescriptor {
                number: 0,
                alternate_setting: 0,
                num_endpoints: 2,
                class: CLASS_HID,
                subclass: 0,
                protocol: 0,
                string_index: 0,
            },
            hid: hid_class_descriptor(),
            ep_in: endpoint(EP_IN_ADDRESS),
            ep_out: endpoint(EP_OUT_ADDRESS),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.interface.to_bytes());
        out.extend_from_slice(&self.hid.to_bytes());
        out.extend_from_slice(&self.ep_in.to_bytes());
        out.extend_from_slice(&self.ep_out.to_bytes());
    }
}

/// HID class descriptor pointing at [`HID_REPORT_DESCRIPTOR`]
pub fn hid_class_descriptor() -> HidDescriptor {
    HidDescriptor {
        bcd_hid: BCD_HID,
        country_code: 0,
        report_len: HID_REPORT_DESCRIPTOR.len() as u16,
    }
}

/// Size of the v2 descriptor blob header plus the two per-speed counts
const DESCRIPTORS_HEADER_LEN: usize = 4 * 5;

/// Total size of the descriptor blob
pub const DESCRIPTORS_LEN: usize = DESCRIPTORS_HEADER_LEN + 2 * DescriptorSet::LEN;

/// Size of the string blob header
const STRINGS_HEADER_LEN: usize = 4 * 4;

/// Total size of the string blob
pub const STRINGS_LEN: usize = STRINGS_HEADER_LEN + 2 + 3 * STRING_FIELD_LEN;

/// Build the descriptor blob written first to `ep0`
pub fn build_descriptors() -> Vec<u8> {
    let set = DescriptorSet::portal();
    let mut blob = Vec::with_capacity(DESCRIPTORS_LEN);

    let mut header = [0u8; DESCRIPTORS_HEADER_LEN];
    LittleEndian::write_u32(&mut header[0..4], DESCRIPTORS_MAGIC_V2);
    LittleEndian::write_u32(&mut header[4..8], DESCRIPTORS_LEN as u32);
    LittleEndian::write_u32(&mut header[8..12], HAS_FS_DESC | HAS_HS_DESC);
    LittleEndian::write_u32(&mut header[12..16], DescriptorSet::COUNT);
    LittleEndian::write_u32(&mut header[16..20], DescriptorSet::COUNT);
    blob.extend_from_slice(&header);

    // full speed, then high speed
    set.write_to(&mut blob);
    set.write_to(&mut blob);

    debug_assert_eq!(blob.len(), DESCRIPTORS_LEN);
    blob
}

/// Build the string blob written to `ep0` right after the descriptors
pub fn build_strings() -> Vec<u8> {
    let mut blob = Vec::with_capacity(STRINGS_LEN);

    let mut header = [0u8; STRINGS_HEADER_LEN + 2];
    LittleEndian::write_u32(&mut header[0..4], STRINGS_MAGIC);
    LittleEndian::write_u32(&mut header[4..8], STRINGS_LEN as u32);
    LittleEndian::write_u32(&mut header[8..12], 3);
    LittleEndian::write_u32(&mut header[12..16], 1);
    LittleEndian::write_u16(&mut header[16..18], LANG_EN_US);
    blob.extend_from_slice(&header);

    for text in [MANUFACTURER, PRODUCT, SERIAL] {
        blob.extend_from_slice(&string_field(text));
    }

    debug_assert_eq!(blob.len(), STRINGS_LEN);
    blob
}

/// Fixed-width NUL padded field; always keeps at least one terminating NUL
fn string_field(text: &str) -> [u8; STRING_FIELD_LEN] {
    let mut field = [0u8; STRING_FIELD_LEN];
    let len = text.len().min(STRING_FIELD_LEN - 1);
    field[..len].copy_from_slice(&text.as_bytes()[..len]);
    field
}
