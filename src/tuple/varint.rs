//! Variable-length integers used for field length slots.
//!
//! Big-endian groups of 7 bits. Every byte but the last carries the
//! continuation bit `0x80`:
//!
//! ```text
//! 100        → 0x64
//! 300        → 0x82 0x2C
//! 16384      → 0x81 0x80 0x00
//! ```

use crate::error::{Error, Result};

const CONTINUE_BIT: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Longest encoding of a u64 (ceil(64 / 7)).
pub const MAX_ENCODED_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let significant_bits = 64 - value.leading_zeros() as usize;
    significant_bits.div_ceil(7).max(1)
}

/// Encode `value` at `buf[pos..]`, returning the position after it.
///
/// The caller sizes `buf` with [`encoded_len`]; writing past the end panics.
pub fn encode(value: u64, buf: &mut [u8], pos: usize) -> usize {
    let len = encoded_len(value);
    for i in 0..len {
        let shift = 7 * (len - 1 - i);
        let mut byte = ((value >> shift) as u8) & PAYLOAD_MASK;
        if i + 1 < len {
            byte |= CONTINUE_BIT;
        }
        buf[pos + i] = byte;
    }
    pos + len
}

/// Decode a value starting at `buf[pos]`, returning it with the position after it.
pub fn decode(buf: &[u8], pos: usize) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut cursor = pos;
    loop {
        let byte = *buf
            .get(cursor)
            .ok_or_else(|| Error::Corruption(format!("varint truncated at offset {cursor}")))?;
        cursor += 1;
        if cursor - pos > MAX_ENCODED_LEN || value.leading_zeros() < 7 {
            return Err(Error::Corruption(format!("varint overflow at offset {pos}")));
        }
        value = (value << 7) | u64::from(byte & PAYLOAD_MASK);
        if byte & CONTINUE_BIT == 0 {
            return Ok((value, cursor));
        }
    }
}
