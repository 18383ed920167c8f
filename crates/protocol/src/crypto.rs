//! Tag sector cryptography
//!
//! Tag sectors are protected with plain AES-128 (Rijndael, 10 rounds) on
//! independent 16-byte blocks; there is no chaining mode. The round-key
//! schedule is derived internally from the 16-byte key on every call.
//!
//! AES is implemented here with lookup tables. It is not constant-time and
//! is meant for transforming tag images, not for protecting secrets.

use crate::command::BLOCK_SIZE;

/// One AES state / tag block
pub type Block = [u8; BLOCK_SIZE];

/// AES-128 key
pub type Key = [u8; 16];

const ROUNDS: usize = 10;

/// 11 round keys of 16 bytes each
type RoundKeys = [u8; (ROUNDS + 1) * 16];

const SBOX: [u8; 256] = [
    0x63, 0x7C, 0x77, 0x7B, 0xF2, 0x6B, 0x6F, 0xC5, 0x30, 0x01, 0x67, 0x2B, 0xFE, 0xD7, 0xAB, 0x76,
    0xCA, 0x82, 0xC9, 0x7D, 0xFA, 0x59, 0x47, 0xF0, 0xAD, 0xD4, 0xA2, 0xAF, 0x9C, 0xA4, 0x72, 0xC0,
    0xB7, 0xFD, 0x93, 0x26, 0x36, 0x3F, 0xF7, 0xCC, 0x34, 0xA5, 0xE5, 0xF1, 0x71, 0xD8, 0x31, 0x15,
    0x04, 0xC7, 0x23, 0xC3, 0x18, 0x96, 0x05, 0x9A, 0x07, 0x12, 0x80, 0xE2, 0xEB, 0x27, 0xB2, 0x75,
    0x09, 0x83, 0x2C, 0x1A, 0x1B, 0x6E, 0x5A, 0xA0, 0x52, 0x3B, 0xD6, 0xB3, 0x29, 0xE3, 0x2F, 0x84,
    0x53, 0xD1, 0x00, 0xED, 0x20, 0xFC, 0xB1, 0x5B, 0x6A, 0xCB, 0xBE, 0x39, 0x4A, 0x4C, 0x58, 0xCF,
    0xD0, 0xEF, 0xAA, 0xFB, 0x43, 0x4D, 0x33, 0x85, 0x45, 0xF9, 0x02, 0x7F, 0x50, 0x3C, 0x9F, 0xA8,
    0x51, 0xA3, 0x40, 0x8F, 0x92, 0x9D, 0x38, 0xF5, 0xBC, 0xB6, 0xDA, 0x21, 0x10, 0xFF, 0xF3, 0xD2,
    0xCD, 0x0C, 0x13, 0xEC, 0x5F, 0x97, 0x44, 0x17, 0xC4, 0xA7, 0x7E, 0x3D, 0x64, 0x5D, 0x19, 0x73,
    0x60, 0x81, 0x4F, 0xDC, 0x22, 0x2A, 0x90, 0x88, 0x46, 0xEE, 0xB8, 0x14, 0xDE, 0x5E, 0x0B, 0xDB,
    0xE0, 0x32, 0x3A, 0x0A, 0x49, 0x06, 0x24, 0x5C, 0xC2, 0xD3, 0xAC, 0x62, 0x91, 0x95, 0xE4, 0x79,
    0xE7, 0xC8, 0x37, 0x6D, 0x8D, 0xD5, 0x4E, 0xA9, 0x6C, 0x56, 0xF4, 0xEA, 0x65, 0x7A, 0xAE, 0x08,
    0xBA, 0x78, 0x25, 0x2E, 0x1C, 0xA6, 0xB4, 0xC6, 0xE8, 0xDD, 0x74, 0x1F, 0x4B, 0xBD, 0x8B, 0x8A,
    0x70, 0x3E, 0xB5, 0x66, 0x48, 0x03, 0xF6, 0x0E, 0x61, 0x35, 0x57, 0xB9, 0x86, 0xC1, 0x1D, 0x9E,
    0xE1, 0xF8, 0x98, 0x11, 0x69, 0xD9, 0x8E, 0x94, 0x9B, 0x1E, 0x87, 0xE9, 0xCE, 0x55, 0x28, 0xDF,
    0x8C, 0xA1, 0x89, 0x0D, 0xBF, 0xE6, 0x42, 0x68, 0x41, 0x99, 0x2D, 0x0F, 0xB0, 0x54, 0xBB, 0x16,
];

const INV_SBOX: [u8; 256] = invert_sbox(&SBOX);

const RCON: [u8; ROUNDS] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1B, 0x36];

const fn invert_sbox(sbox: &[u8; 256]) -> [u8; 256] {
    let mut inv = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inv[sbox[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

/// Multiply in GF(2^8) modulo x^8 + x^4 + x^3 + x + 1
#[inline]
fn gmul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    product
}

fn expand_key(key: &Key) -> RoundKeys {
    let mut w: RoundKeys = [0u8; (ROUNDS + 1) * 16];
    w[..16].copy_from_slice(key);

    for i in 4..4 * (ROUNDS + 1) {
        let mut t = [
            w[(i - 1) * 4],
            w[(i - 1) * 4 + 1],
            w[(i - 1) * 4 + 2],
            w[(i - 1) * 4 + 3],
        ];
        if i % 4 == 0 {
            t = [
                SBOX[t[1] as usize] ^ RCON[i / 4 - 1],
                SBOX[t[2] as usize],
                SBOX[t[3] as usize],
                SBOX[t[0] as usize],
            ];
        }
        for j in 0..4 {
            w[i * 4 + j] = w[(i - 4) * 4 + j] ^ t[j];
        }
    }
    w
}

fn add_round_key(state: &mut Block, round_keys: &RoundKeys, round: usize) {
    let key = &round_keys[round * 16..(round + 1) * 16];
    for (b, k) in state.iter_mut().zip(key) {
        *b ^= k;
    }
}

fn sub_bytes(state: &mut Block, table: &[u8; 256]) {
    for b in state.iter_mut() {
        *b = table[*b as usize];
    }
}

// State is column-major: row r is bytes {r, r+4, r+8, r+12}.
fn shift_rows(state: &mut Block) {
    let s = *state;
    for col in 0..4 {
        for row in 0..4 {
            state[col * 4 + row] = s[((col + row) % 4) * 4 + row];
        }
    }
}

fn inv_shift_rows(state: &mut Block) {
    let s = *state;
    for col in 0..4 {
        for row in 0..4 {
            state[((col + row) % 4) * 4 + row] = s[col * 4 + row];
        }
    }
}

fn mix_columns(state: &mut Block) {
    for col in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        col[0] = gmul(a0, 2) ^ gmul(a1, 3) ^ a2 ^ a3;
        col[1] = a0 ^ gmul(a1, 2) ^ gmul(a2, 3) ^ a3;
        col[2] = a0 ^ a1 ^ gmul(a2, 2) ^ gmul(a3, 3);
        col[3] = gmul(a0, 3) ^ a1 ^ a2 ^ gmul(a3, 2);
    }
}

fn inv_mix_columns(state: &mut Block) {
    for col in state.chunks_exact_mut(4) {
        let [a0, a1, a2, a3] = [col[0], col[1], col[2], col[3]];
        col[0] = gmul(a0, 14) ^ gmul(a1, 11) ^ gmul(a2, 13) ^ gmul(a3, 9);
        col[1] = gmul(a0, 9) ^ gmul(a1, 14) ^ gmul(a2, 11) ^ gmul(a3, 13);
        col[2] = gmul(a0, 13) ^ gmul(a1, 9) ^ gmul(a2, 14) ^ gmul(a3, 11);
        col[3] = gmul(a0, 11) ^ gmul(a1, 13) ^ gmul(a2, 9) ^ gmul(a3, 14);
    }
}

/// Encrypt one 16-byte block with AES-128
pub fn encrypt_block(key: &Key, input: &Block) -> Block {
    let round_keys = expand_key(key);
    let mut state = *input;

    add_round_key(&mut state, &round_keys, 0);
    for round in 1..ROUNDS {
        sub_bytes(&mut state, &SBOX);
        shift_rows(&mut state);
        mix_columns(&mut state);
        add_round_key(&mut state, &round_keys, round);
    }
    sub_bytes(&mut state, &SBOX);
    shift_rows(&mut state);
    add_round_key(&mut state, &round_keys, ROUNDS);

    state
}

/// Decrypt one 16-byte block with AES-128
pub fn decrypt_block(key: &Key, input: &Block) -> Block {
    let round_keys = expand_key(key);
    let mut state = *input;

    add_round_key(&mut state, &round_keys, ROUNDS);
    for round in (1..ROUNDS).rev() {
        inv_shift_rows(&mut state);
        sub_bytes(&mut state, &INV_SBOX);
        add_round_key(&mut state, &round_keys, round);
        inv_mix_columns(&mut state);
    }
    inv_shift_rows(&mut state);
    sub_bytes(&mut state, &INV_SBOX);
    add_round_key(&mut state, &round_keys, 0);

    state
}

/// Copy a raw tag dump into a tag buffer
///
/// The dump is truncated to the buffer's capacity; bytes of `tag` beyond
/// the dump are left untouched. Returns the number of bytes copied. No
/// sector is decrypted: dumps are stored exactly as read from the tag.
pub fn import_dump(dump: &[u8], tag: &mut [u8]) -> usize {
    let len = dump.len().min(tag.len());
    tag[..len].copy_from_slice(&dump[..len]);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 appendix C.1
    const KEY: Key = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
        0x0f,
    ];
    const PLAINTEXT: Block = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0xff,
    ];
    const CIPHERTEXT: Block = [
        0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4, 0xc5,
        0x5a,
    ];

    #[test]
    fn test_fips197_encrypt() {
        assert_eq!(encrypt_block(&KEY, &PLAINTEXT), CIPHERTEXT);
    }

    #[test]
    fn test_fips197_decrypt() {
        assert_eq!(decrypt_block(&KEY, &CIPHERTEXT), PLAINTEXT);
    }

    #[test]
    fn test_key_schedule_last_round() {
        // FIPS-197 appendix A.1, w[40..44]
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let round_keys = expand_key(&key);
        assert_eq!(
            &round_keys[160..],
            &[
                0xd0, 0x14, 0xf9, 0xa8, 0xc9, 0xee, 0x25, 0x89, 0xe1, 0x3f, 0x0c, 0xc8, 0xb6, 0x63,
                0x0c, 0xa6
            ]
        );
    }

    #[test]
    fn test_inv_sbox() {
        for i in 0..=255u8 {
            assert_eq!(INV_SBOX[SBOX[i as usize] as usize], i);
        }
    }

    #[test]
    fn test_gmul() {
        assert_eq!(gmul(0x57, 0x83), 0xc1);
        assert_eq!(gmul(0x57, 0x13), 0xfe);
    }

    #[test]
    fn test_import_dump_truncates() {
        let dump = vec![0xAA; 2048];
        let mut tag = [0u8; 1024];
        assert_eq!(import_dump(&dump, &mut tag), 1024);
        assert!(tag.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_import_short_dump() {
        let mut tag = [0x11u8; 8];
        assert_eq!(import_dump(&[1, 2, 3], &mut tag), 3);
        assert_eq!(tag, [1, 2, 3, 0x11, 0x11, 0x11, 0x11, 0x11]);
    }
}
