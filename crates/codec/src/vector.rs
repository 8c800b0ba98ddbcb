//! `VectorFloat32` serialization: element count then elements, little endian.

use crate::error::{CodecError, CodecResult};

pub fn serialized_size(v: &[f32]) -> usize {
    4 + 4 * v.len()
}

pub fn encode_vector(b: &mut Vec<u8>, v: &[f32]) {
    b.reserve(serialized_size(v));
    b.extend_from_slice(&(v.len() as u32).to_le_bytes());
    for f in v {
        b.extend_from_slice(&f.to_bits().to_le_bytes());
    }
}

pub fn peek_vector(b: &[u8]) -> CodecResult<usize> {
    if b.len() < 4 {
        return Err(CodecError::need(4, b.len()));
    }
    let n = u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize;
    let size = 4 + 4 * n;
    if b.len() < size {
        return Err(CodecError::need(size, b.len()));
    }
    Ok(size)
}

pub fn decode_vector(b: &[u8]) -> CodecResult<(&[u8], Vec<f32>)> {
    let size = peek_vector(b)?;
    let values = b[4..size]
        .chunks_exact(4)
        .map(|c| f32::from_bits(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    Ok((&b[size..], values))
}
