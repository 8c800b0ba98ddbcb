//! Fixed-width comparable integers and variable-width varints.

use crate::error::{CodecError, CodecResult};

const SIGN_MASK: u64 = 0x8000_0000_0000_0000;

/// Maximum bytes a 64-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `v` as 8 big-endian bytes with the sign bit flipped, so that
/// byte order equals numeric order.
pub fn encode_int(b: &mut Vec<u8>, v: i64) {
    b.extend_from_slice(&((v as u64) ^ SIGN_MASK).to_be_bytes());
}

pub fn decode_int(b: &[u8]) -> CodecResult<(&[u8], i64)> {
    let (rest, u) = decode_uint(b)?;
    Ok((rest, (u ^ SIGN_MASK) as i64))
}

/// Append `v` as 8 big-endian bytes.
pub fn encode_uint(b: &mut Vec<u8>, v: u64) {
    b.extend_from_slice(&v.to_be_bytes());
}

pub fn decode_uint(b: &[u8]) -> CodecResult<(&[u8], u64)> {
    if b.len() < 8 {
        return Err(CodecError::need(8, b.len()));
    }
    let (head, rest) = b.split_at(8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(head);
    Ok((rest, u64::from_be_bytes(raw)))
}

/// Append `v` as a zig-zag varint.
pub fn encode_varint(b: &mut Vec<u8>, v: i64) {
    let mut ux = (v as u64) << 1;
    if v < 0 {
        ux = !ux;
    }
    encode_uvarint(b, ux);
}

pub fn decode_varint(b: &[u8]) -> CodecResult<(&[u8], i64)> {
    let (rest, ux) = decode_uvarint(b)?;
    let mut x = (ux >> 1) as i64;
    if ux & 1 != 0 {
        x = !x;
    }
    Ok((rest, x))
}

/// Append `v` as a LEB128 unsigned varint.
pub fn encode_uvarint(b: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        b.push((v as u8) | 0x80);
        v >>= 7;
    }
    b.push(v as u8);
}

pub fn decode_uvarint(b: &[u8]) -> CodecResult<(&[u8], u64)> {
    let n = uvarint_len(b)?;
    let mut x = 0u64;
    for (i, byte) in b[..n].iter().enumerate() {
        x |= u64::from(byte & 0x7f) << (7 * i);
    }
    Ok((&b[n..], x))
}

/// Length in bytes of the varint at the start of `b`.
pub fn uvarint_len(b: &[u8]) -> CodecResult<usize> {
    for (i, byte) in b.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(CodecError::VarintOverflow);
        }
        if *byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && *byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            return Ok(i + 1);
        }
    }
    Err(CodecError::InsufficientBytes)
}

pub fn uvarint_size(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

pub fn varint_size(v: i64) -> usize {
    let mut ux = (v as u64) << 1;
    if v < 0 {
        ux = !ux;
    }
    uvarint_size(ux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn comparable_int_is_sign_flipped_big_endian() {
        let mut b = Vec::new();
        encode_int(&mut b, -1);
        assert_eq!(b, vec![0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        b.clear();
        encode_int(&mut b, 0);
        assert_eq!(b, vec![0x80, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn varint_matches_zigzag_layout() {
        let mut b = Vec::new();
        encode_varint(&mut b, -1);
        assert_eq!(b, vec![0x01]);
        b.clear();
        encode_varint(&mut b, 64);
        assert_eq!(b, vec![0x80, 0x01]);
        assert_eq!(varint_size(64), 2);
    }

    #[test]
    fn short_buffers_fail() {
        assert_eq!(decode_uint(&[1, 2, 3]), Err(CodecError::need(8, 3)));
        assert_eq!(decode_uvarint(&[0x80, 0x80]), Err(CodecError::InsufficientBytes));
        assert_eq!(decode_uvarint(&[0xff; 11]), Err(CodecError::VarintOverflow));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn comparable_int_preserves_order(a in any::<i64>(), b in any::<i64>()) {
            let (mut ea, mut eb) = (Vec::new(), Vec::new());
            encode_int(&mut ea, a);
            encode_int(&mut eb, b);
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn varints_round_trip(v in any::<i64>(), u in any::<u64>()) {
            let mut b = Vec::new();
            encode_varint(&mut b, v);
            prop_assert_eq!(b.len(), varint_size(v));
            encode_uvarint(&mut b, u);
            let (rest, dv) = decode_varint(&b).unwrap();
            let (rest, du) = decode_uvarint(rest).unwrap();
            prop_assert!(rest.is_empty());
            prop_assert_eq!((dv, du), (v, u));
        }
    }
}
