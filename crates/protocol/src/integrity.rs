//! Tag sector checksums
//!
//! Tag data carries a 16-bit additive checksum in its last two bytes,
//! stored big-endian. The sum covers every byte before the trailer and
//! wraps on overflow.
//!
//! # Usage
//!
//! ```
//! use protocol::integrity::{calculate_checksum, verify_checksum};
//!
//! let mut sector = [0x10, 0x20, 0x30, 0x00, 0x00];
//! calculate_checksum(&mut sector);
//! assert_eq!(&sector[3..], &[0x00, 0x60]);
//! assert!(verify_checksum(&sector));
//! ```

use byteorder::{BigEndian, ByteOrder};

/// Length of the checksum trailer
pub const CHECKSUM_LEN: usize = 2;

/// Sum all bytes except the trailing two
///
/// Buffers shorter than the trailer sum to zero.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    let body = data.len().saturating_sub(CHECKSUM_LEN);
    data[..body]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

/// Check the stored trailer against the recomputed sum
///
/// Returns `false` for buffers too short to hold a trailer.
#[inline]
pub fn verify_checksum(data: &[u8]) -> bool {
    if data.len() < CHECKSUM_LEN {
        return false;
    }
    BigEndian::read_u16(&data[data.len() - CHECKSUM_LEN..]) == checksum(data)
}

/// Overwrite the trailing two bytes with the checksum
///
/// Buffers too short to hold a trailer are left unchanged.
#[inline]
pub fn calculate_checksum(data: &mut [u8]) {
    if data.len() < CHECKSUM_LEN {
        return;
    }
    let sum = checksum(data);
    let trailer = data.len() - CHECKSUM_LEN;
    BigEndian::write_u16(&mut data[trailer..], sum);
}
