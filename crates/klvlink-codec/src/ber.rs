//! BER length fields.
//!
//! Short form is a single byte below `0x80`. Long form is a header byte
//! `0x80 | n` followed by `n` big-endian value bytes, with `n` minimal.

use bytes::BufMut;

use crate::error::{KlvError, Result};

/// Maximum number of long-form length octets accepted on decode.
pub const MAX_LENGTH_OCTETS: usize = 8;

/// Decode a BER length starting at `offset`.
///
/// Returns `(value, consumed)` where `consumed` counts the header byte.
pub fn decode(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let rest = buf.get(offset..).unwrap_or_default();
    let Some(&first) = rest.first() else {
        return Err(KlvError::Truncated {
            needed: 1,
            available: 0,
        });
    };

    if first & 0x80 == 0 {
        return Ok((u64::from(first), 1));
    }

    let octets = usize::from(first & 0x7F);
    if octets > MAX_LENGTH_OCTETS {
        return Err(KlvError::LengthOverflow { octets });
    }
    if rest.len() < 1 + octets {
        return Err(KlvError::Truncated {
            needed: 1 + octets,
            available: rest.len(),
        });
    }

    let value = rest[1..=octets]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    Ok((value, 1 + octets))
}

/// Number of bytes `encode(value)` produces.
pub fn encoded_len(value: u64) -> usize {
    if value < 0x80 {
        1
    } else {
        1 + value_octets(value)
    }
}

/// Encode `value` in canonical BER form.
pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut out);
    out
}

/// Append the canonical BER encoding of `value` to `dst`.
pub fn encode_into(value: u64, dst: &mut impl BufMut) {
    if value < 0x80 {
        dst.put_u8(value as u8);
        return;
    }
    let octets = value_octets(value);
    dst.put_u8(0x80 | octets as u8);
    dst.put_slice(&value.to_be_bytes()[8 - octets..]);
}

fn value_octets(value: u64) -> usize {
    let significant_bits = 64 - value.leading_zeros() as usize;
    significant_bits.div_ceil(8).max(1)
}
