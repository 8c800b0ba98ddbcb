//! Self-delimiting binary form for JSON documents.
//!
//! Every value starts with a one-byte type code. Scalars have a fixed or
//! varint-prefixed payload. Arrays and objects start with two little-endian
//! `u32`s (element count, total payload size including this header), so the
//! length of any value can be found without walking its children.

use serde_json::{Map, Number, Value};

use crate::error::{CodecError, CodecResult};
use crate::number::{decode_uvarint, encode_uvarint};

pub const TYPE_OBJECT: u8 = 0x01;
pub const TYPE_ARRAY: u8 = 0x03;
pub const TYPE_LITERAL: u8 = 0x04;
pub const TYPE_INT64: u8 = 0x09;
pub const TYPE_UINT64: u8 = 0x0a;
pub const TYPE_FLOAT64: u8 = 0x0b;
pub const TYPE_STRING: u8 = 0x0c;

const LITERAL_NULL: u8 = 0x00;
const LITERAL_TRUE: u8 = 0x01;
const LITERAL_FALSE: u8 = 0x02;

const CONTAINER_HEADER: usize = 8;

pub fn encode_json(b: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Null => b.extend_from_slice(&[TYPE_LITERAL, LITERAL_NULL]),
        Value::Bool(true) => b.extend_from_slice(&[TYPE_LITERAL, LITERAL_TRUE]),
        Value::Bool(false) => b.extend_from_slice(&[TYPE_LITERAL, LITERAL_FALSE]),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                b.push(TYPE_INT64);
                b.extend_from_slice(&i.to_le_bytes());
            } else if let Some(u) = n.as_u64() {
                b.push(TYPE_UINT64);
                b.extend_from_slice(&u.to_le_bytes());
            } else {
                let f = n.as_f64().unwrap_or_default();
                let f = if f == 0.0 { 0.0 } else { f };
                b.push(TYPE_FLOAT64);
                b.extend_from_slice(&f.to_bits().to_le_bytes());
            }
        }
        Value::String(s) => {
            b.push(TYPE_STRING);
            encode_uvarint(b, s.len() as u64);
            b.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            b.push(TYPE_ARRAY);
            encode_container(b, items.len(), |b| {
                for item in items {
                    encode_json(b, item);
                }
            });
        }
        Value::Object(map) => {
            b.push(TYPE_OBJECT);
            encode_container(b, map.len(), |b| {
                for (k, item) in map {
                    encode_uvarint(b, k.len() as u64);
                    b.extend_from_slice(k.as_bytes());
                    encode_json(b, item);
                }
            });
        }
    }
}

fn encode_container(b: &mut Vec<u8>, count: usize, body: impl FnOnce(&mut Vec<u8>)) {
    let start = b.len();
    b.extend_from_slice(&(count as u32).to_le_bytes());
    b.extend_from_slice(&[0; 4]);
    body(b);
    let size = (b.len() - start) as u32;
    b[start + 4..start + CONTAINER_HEADER].copy_from_slice(&size.to_le_bytes());
}

/// Encoded length of the JSON value at the start of `b`, type code included.
pub fn peek_json(b: &[u8]) -> CodecResult<usize> {
    let Some((&type_code, payload)) = b.split_first() else {
        return Err(CodecError::InsufficientBytes);
    };
    let len = match type_code {
        TYPE_LITERAL => 1,
        TYPE_INT64 | TYPE_UINT64 | TYPE_FLOAT64 => 8,
        TYPE_STRING => {
            let (rest, n) = decode_uvarint(payload)?;
            usize::try_from(n)
                .ok()
                .and_then(|n| n.checked_add(payload.len() - rest.len()))
                .ok_or(CodecError::VarintOverflow)?
        }
        TYPE_ARRAY | TYPE_OBJECT => {
            let size = read_u32(payload.get(4..CONTAINER_HEADER).ok_or(CodecError::need(
                CONTAINER_HEADER + 1,
                b.len(),
            ))?) as usize;
            if size < CONTAINER_HEADER {
                return Err(CodecError::InvalidJson(format!(
                    "container size {size} smaller than its header"
                )));
            }
            size
        }
        other => return Err(CodecError::InvalidJson(format!("unknown type code {other:#04x}"))),
    };
    if payload.len() < len {
        return Err(CodecError::need(len + 1, b.len()));
    }
    Ok(len + 1)
}

/// Decode one JSON value; returns the value and the bytes consumed.
pub fn decode_json(b: &[u8]) -> CodecResult<(Value, usize)> {
    let size = peek_json(b)?;
    let payload = b.get(1..size).ok_or(CodecError::need(size, b.len()))?;
    let value = match b[0] {
        TYPE_LITERAL => match payload {
            [LITERAL_NULL] => Value::Null,
            [LITERAL_TRUE] => Value::Bool(true),
            [LITERAL_FALSE] => Value::Bool(false),
            other => return Err(CodecError::InvalidJson(format!("unknown literal {other:02x?}"))),
        },
        TYPE_INT64 => Value::from(i64::from_le_bytes(fixed8(payload))),
        TYPE_UINT64 => Value::from(u64::from_le_bytes(fixed8(payload))),
        TYPE_FLOAT64 => {
            let f = f64::from_bits(u64::from_le_bytes(fixed8(payload)));
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| CodecError::InvalidJson(format!("non-finite float {f}")))?
        }
        TYPE_STRING => {
            let (rest, _) = decode_uvarint(payload)?;
            Value::String(String::from_utf8(rest.to_vec()).map_err(|_| CodecError::InvalidUtf8)?)
        }
        TYPE_ARRAY => {
            let (count, mut cursor) = split_container(payload)?;
            let mut items = Vec::with_capacity(count.min(cursor.len()));
            for _ in 0..count {
                let (item, used) = decode_json(cursor)?;
                items.push(item);
                cursor = &cursor[used..];
            }
            Value::Array(items)
        }
        TYPE_OBJECT => {
            let (count, mut cursor) = split_container(payload)?;
            let mut map = Map::new();
            for _ in 0..count {
                let (rest, key_len) = decode_uvarint(cursor)?;
                let key_len = usize::try_from(key_len).map_err(|_| CodecError::VarintOverflow)?;
                if rest.len() < key_len {
                    return Err(CodecError::need(key_len, rest.len()));
                }
                let key = String::from_utf8(rest[..key_len].to_vec()).map_err(|_| CodecError::InvalidUtf8)?;
                let (item, used) = decode_json(&rest[key_len..])?;
                map.insert(key, item);
                cursor = &rest[key_len + used..];
            }
            Value::Object(map)
        }
        other => return Err(CodecError::InvalidJson(format!("unknown type code {other:#04x}"))),
    };
    Ok((value, size))
}

/// Element count and body of a container payload whose size `peek_json` has checked.
fn split_container(payload: &[u8]) -> CodecResult<(usize, &[u8])> {
    match (payload.get(..4), payload.get(CONTAINER_HEADER..)) {
        (Some(count), Some(body)) => Ok((read_u32(count) as usize, body)),
        _ => Err(CodecError::need(CONTAINER_HEADER, payload.len())),
    }
}

fn read_u32(b: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&b[..4]);
    u32::from_le_bytes(raw)
}

fn fixed8(b: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[..8]);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_documents_round_trip() {
        let doc = json!({"a": [1, -2, 18446744073709551615u64, 1.5, null, true], "b": {"c": "héllo"}});
        let mut b = Vec::new();
        encode_json(&mut b, &doc);
        assert_eq!(peek_json(&b).unwrap(), b.len());
        let (back, used) = decode_json(&b).unwrap();
        assert_eq!(used, b.len());
        assert_eq!(back, doc);
    }

    #[test]
    fn truncated_container_reports_lengths() {
        let mut b = Vec::new();
        encode_json(&mut b, &json!([1, 2, 3]));
        let err = peek_json(&b[..b.len() - 1]).unwrap_err();
        assert_eq!(err, CodecError::need(b.len(), b.len() - 1));
    }

    #[test]
    fn container_smaller_than_header_is_rejected() {
        for type_code in [TYPE_ARRAY, TYPE_OBJECT] {
            let b = [type_code, 0, 0, 0, 0, 0, 0, 0, 0];
            assert!(matches!(peek_json(&b), Err(CodecError::InvalidJson(_))));
            assert!(matches!(decode_json(&b), Err(CodecError::InvalidJson(_))));
        }
    }

    #[test]
    fn truncated_values_fail_for_every_type() {
        let docs = [
            json!(null),
            json!(-7),
            json!(18446744073709551615u64),
            json!(2.5),
            json!("hello"),
            json!([1, "x"]),
            json!({"k": [true]}),
        ];
        for doc in docs {
            let mut b = Vec::new();
            encode_json(&mut b, &doc);
            for cut in 0..b.len() {
                assert!(peek_json(&b[..cut]).is_err(), "{doc} cut at {cut}");
                assert!(decode_json(&b[..cut]).is_err(), "{doc} cut at {cut}");
            }
        }
    }

    #[test]
    fn oversized_string_length_fails() {
        let mut b = vec![TYPE_STRING];
        encode_uvarint(&mut b, u64::MAX);
        assert!(peek_json(&b).is_err());
        assert!(decode_json(&b).is_err());

        let mut b = vec![TYPE_STRING];
        encode_uvarint(&mut b, 1 << 40);
        b.extend_from_slice(b"abc");
        assert!(matches!(peek_json(&b), Err(CodecError::Insufficient { .. })));
    }

    #[test]
    fn container_size_beyond_buffer_fails() {
        let mut b = vec![TYPE_ARRAY, 1, 0, 0, 0];
        b.extend_from_slice(&u32::MAX.to_le_bytes());
        b.extend_from_slice(&[TYPE_LITERAL, LITERAL_NULL]);
        assert!(matches!(decode_json(&b), Err(CodecError::Insufficient { .. })));
    }

    #[test]
    fn unknown_type_code_fails() {
        assert!(matches!(peek_json(&[0x7f, 0]), Err(CodecError::InvalidJson(_))));
    }
}
