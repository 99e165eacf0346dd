//! Variable-length integer encoding for the counter journal and snapshots.
//!
//! Unsigned values use 7 bits per byte with a continuation bit. Signed
//! counter deltas are zigzag-mapped first so that small negative values stay
//! short.

use crate::error::{Result, SegrankError};

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value from variable-length encoding.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(SegrankError::codec("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(SegrankError::codec("Incomplete VarInt"))
}

/// Map a signed value onto the unsigned range (0, -1, 1, -2, ... -> 0, 1, 2, 3, ...).
fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Encode a signed value as a zigzag varint.
pub fn encode_i64(value: i64) -> Vec<u8> {
    encode_u64(zigzag_encode(value))
}

/// Decode a zigzag varint.
pub fn decode_i64(bytes: &[u8]) -> Result<(i64, usize)> {
    let (raw, read) = decode_u64(bytes)?;
    Ok((zigzag_decode(raw), read))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_zigzag_keeps_small_deltas_short() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(encode_i64(-1).len(), 1);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MAX)), i64::MAX);
    }

    #[test]
    fn test_signed_sequence() {
        let mut buffer = Vec::new();
        for value in [-3i64, 0, 7, -1_000_000] {
            buffer.extend(encode_i64(value));
        }

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < buffer.len() {
            let (value, read) = decode_i64(&buffer[offset..]).unwrap();
            decoded.push(value);
            offset += read;
        }
        assert_eq!(decoded, vec![-3, 0, 7, -1_000_000]);
    }

    #[test]
    fn test_incomplete_varint() {
        let incomplete = vec![0x80]; // Continuation bit set but no more data
        assert!(decode_u64(&incomplete).is_err());
    }

    #[test]
    fn test_overflow() {
        let overflow_data = vec![0xFF; 11];
        assert!(decode_u64(&overflow_data).is_err());
    }
}
