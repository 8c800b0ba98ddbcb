//! Memcomparable and compact byte-string encodings.
//!
//! The memcomparable form splits the input into 8-byte groups. Every group is
//! followed by a marker byte equal to `0xFF - pad`, where `pad` is the number
//! of zero bytes appended to fill the last group. A final group is always
//! written, so an input whose length is a multiple of 8 ends with an all-pad
//! group (`marker = 0xF7`).

use crate::error::{CodecError, CodecResult};
use crate::number::{decode_varint, encode_varint, varint_size};

const GROUP_SIZE: usize = 8;
const MARKER: u8 = 0xFF;
const PAD: u8 = 0x00;

pub fn encode_bytes(b: &mut Vec<u8>, data: &[u8]) {
    b.reserve(comparable_bytes_size(data.len()));
    let mut idx = 0;
    loop {
        let remain = data.len() - idx;
        if remain >= GROUP_SIZE {
            b.extend_from_slice(&data[idx..idx + GROUP_SIZE]);
            b.push(MARKER);
        } else {
            let pad = GROUP_SIZE - remain;
            b.extend_from_slice(&data[idx..]);
            b.extend(std::iter::repeat_n(PAD, pad));
            b.push(MARKER - pad as u8);
            return;
        }
        idx += GROUP_SIZE;
    }
}

pub fn decode_bytes(mut b: &[u8]) -> CodecResult<(&[u8], Vec<u8>)> {
    let mut data = Vec::with_capacity(b.len());
    loop {
        if b.len() < GROUP_SIZE + 1 {
            return Err(CodecError::InsufficientBytes);
        }
        let (group, marker) = (&b[..GROUP_SIZE], b[GROUP_SIZE]);
        let pad = MARKER.wrapping_sub(marker) as usize;
        if pad > GROUP_SIZE {
            return Err(CodecError::InvalidMarker(marker));
        }
        let real = GROUP_SIZE - pad;
        data.extend_from_slice(&group[..real]);
        b = &b[GROUP_SIZE + 1..];
        if pad != 0 {
            if group[real..].iter().any(|&p| p != PAD) {
                return Err(CodecError::InvalidPadding);
            }
            return Ok((b, data));
        }
    }
}

/// Length of the memcomparable element at the start of `b`.
pub fn peek_bytes(b: &[u8]) -> CodecResult<usize> {
    let mut offset = 0;
    loop {
        if b.len() < offset + GROUP_SIZE + 1 {
            return Err(CodecError::InsufficientBytes);
        }
        let marker = b[offset + GROUP_SIZE];
        offset += GROUP_SIZE + 1;
        if marker != MARKER {
            return Ok(offset);
        }
    }
}

pub fn comparable_bytes_size(len: usize) -> usize {
    (len / GROUP_SIZE + 1) * (GROUP_SIZE + 1)
}

/// Varint length prefix followed by the raw bytes.
pub fn encode_compact_bytes(b: &mut Vec<u8>, data: &[u8]) {
    b.reserve(compact_bytes_size(data.len()));
    encode_varint(b, data.len() as i64);
    b.extend_from_slice(data);
}

pub fn decode_compact_bytes(b: &[u8]) -> CodecResult<(&[u8], Vec<u8>)> {
    let (rest, n) = decode_varint(b)?;
    let n = usize::try_from(n).map_err(|_| CodecError::InvalidKey("negative byte length"))?;
    if rest.len() < n {
        return Err(CodecError::need(n, rest.len()));
    }
    Ok((&rest[n..], rest[..n].to_vec()))
}

pub fn peek_compact_bytes(b: &[u8]) -> CodecResult<usize> {
    let (rest, n) = decode_varint(b)?;
    let n = usize::try_from(n).map_err(|_| CodecError::InvalidKey("negative byte length"))?;
    let header = b.len() - rest.len();
    if rest.len() < n {
        return Err(CodecError::need(n, rest.len()));
    }
    Ok(header + n)
}

pub fn compact_bytes_size(len: usize) -> usize {
    varint_size(len as i64) + len
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enc(data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        encode_bytes(&mut b, data);
        b
    }

    #[test]
    fn group_layout() {
        assert_eq!(enc(b""), vec![0, 0, 0, 0, 0, 0, 0, 0, 0xF7]);
        assert_eq!(enc(b"abc"), vec![b'a', b'b', b'c', 0, 0, 0, 0, 0, 0xFA]);
        let full = enc(b"12345678");
        assert_eq!(full.len(), 18);
        assert_eq!(full[8], 0xFF);
        assert_eq!(full[17], 0xF7);
    }

    #[test]
    fn rejects_corrupt_groups() {
        let mut bad = enc(b"abc");
        bad[7] = 1;
        assert_eq!(decode_bytes(&bad), Err(CodecError::InvalidPadding));
        let mut bad = enc(b"abc");
        bad[8] = 0x10;
        assert_eq!(decode_bytes(&bad), Err(CodecError::InvalidMarker(0x10)));
        assert_eq!(decode_bytes(&enc(b"abc")[..5]), Err(CodecError::InsufficientBytes));
    }

    #[test]
    fn compact_length_overrun() {
        let mut b = Vec::new();
        encode_compact_bytes(&mut b, b"hello");
        assert_eq!(peek_compact_bytes(&b), Ok(6));
        assert_eq!(decode_compact_bytes(&b[..4]), Err(CodecError::need(5, 3)));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn memcomparable_preserves_order(a in proptest::collection::vec(any::<u8>(), 0..40),
                                         b in proptest::collection::vec(any::<u8>(), 0..40)) {
            let (ea, eb) = (enc(&a), enc(&b));
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
            prop_assert_eq!(peek_bytes(&ea).unwrap(), ea.len());
            prop_assert_eq!(ea.len(), comparable_bytes_size(a.len()));
            let (rest, da) = decode_bytes(&ea).unwrap();
            prop_assert!(rest.is_empty());
            prop_assert_eq!(da, a);
        }
    }
}
