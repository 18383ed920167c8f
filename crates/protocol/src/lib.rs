//! Wire protocol for the portal emulator
//!
//! This crate holds everything that crosses the USB cable, as plain data:
//! the FunctionFS descriptor and string blobs, `ep0` event records and the
//! control-request dispatcher, the portal command frames exchanged on the
//! interrupt endpoints, and the tag sector crypto helpers. Nothing here
//! touches a file descriptor.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, ResponseFrame};
//!
//! // Host asks which slots hold a tag
//! let command = Command::parse(&[0x53]).unwrap();
//! assert_eq!(command, Command::Sense);
//!
//! // Slot 0 present, slot 1 empty
//! let reply = ResponseFrame::sense(0b01);
//! assert_eq!(&reply.as_bytes()[..7], &[0x53, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);
//! ```
//!
//! # Control Requests
//!
//! ```
//! use protocol::{ControlReply, FfsEvent, handle_setup};
//!
//! // GET_DESCRIPTOR(HID report), wLength = 64
//! let mut record = [0u8; FfsEvent::RECORD_LEN];
//! record[..8].copy_from_slice(&[0x81, 0x06, 0x00, 0x22, 0x00, 0x00, 0x40, 0x00]);
//! record[8] = 4;
//!
//! let FfsEvent::Setup(setup) = FfsEvent::parse(&record).unwrap() else {
//!     unreachable!()
//! };
//! match handle_setup(&setup) {
//!     ControlReply::Data(bytes) => assert_eq!(bytes.len(), 29),
//!     other => panic!("unexpected reply {:?}", other),
//! }
//! ```

pub mod command;
pub mod control;
pub mod crypto;
pub mod descriptors;
pub mod error;
pub mod integrity;

pub use command::{
    BLOCK_SIZE, Command, MAX_REQUEST_LEN, MAX_SLOTS, Opcode, RESPONSE_LEN, ResponseFrame,
    slot_from_query,
};
pub use control::{ControlReply, FfsEvent, RequestKind, SetupRequest, handle_setup};
pub use crypto::{decrypt_block, encrypt_block, import_dump};
pub use descriptors::{
    DESCRIPTORS_LEN, DescriptorSet, HID_REPORT_DESCRIPTOR, STRINGS_LEN, build_descriptors,
    build_strings,
};
pub use error::{ProtocolError, Result};
pub use integrity::{calculate_checksum, checksum, verify_checksum};
