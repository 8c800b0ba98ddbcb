//! Encoding and decoding of datum sequences.

use chrono_tz::Tz;

use crate::bytes::{
    comparable_bytes_size, compact_bytes_size, decode_bytes, decode_compact_bytes, encode_bytes,
    encode_compact_bytes, peek_bytes, peek_compact_bytes,
};
use crate::collation::Collation;
use crate::datum::{ColumnType, Datum, Enum, Set, binary_literal_to_int};
use crate::decimal::{self, Decimal, check_precision};
use crate::error::{CodecError, CodecResult};
use crate::flag;
use crate::float::{decode_float, encode_float};
use crate::json::{decode_json, encode_json, peek_json};
use crate::number::{
    decode_int, decode_uint, decode_uvarint, decode_varint, encode_int, encode_uint, encode_uvarint,
    encode_varint, uvarint_len, uvarint_size, varint_size,
};
use crate::time::{Duration, MAX_FSP, Time};
use crate::vector::{decode_vector, encode_vector, peek_vector, serialized_size};

/// Encode `values` so that byte order of the output equals tuple order of
/// the input.
pub fn encode_key(tz: &Tz, values: &[Datum]) -> CodecResult<Vec<u8>> {
    let mut b = Vec::new();
    encode_into(&mut b, values, true, tz)?;
    Ok(b)
}

/// Encode `values` in the compact, non-comparable form.
pub fn encode_value(tz: &Tz, values: &[Datum]) -> CodecResult<Vec<u8>> {
    let mut b = Vec::new();
    encode_into(&mut b, values, false, tz)?;
    Ok(b)
}

/// Append the encoding of `values` to `b`.
pub fn encode_into(b: &mut Vec<u8>, values: &[Datum], comparable: bool, tz: &Tz) -> CodecResult<()> {
    b.reserve(values.iter().map(|v| size_hint(v, comparable)).sum());
    for v in values {
        encode_datum(b, v, comparable, tz)?;
    }
    Ok(())
}

fn encode_datum(b: &mut Vec<u8>, v: &Datum, comparable: bool, tz: &Tz) -> CodecResult<()> {
    match v {
        Datum::Null => b.push(flag::NIL),
        Datum::Int64(i) => encode_signed(b, *i, comparable),
        Datum::Uint64(u) => encode_unsigned(b, *u, comparable),
        Datum::Float32(f) => {
            b.push(flag::FLOAT);
            encode_float(b, f64::from(*f));
        }
        Datum::Float64(f) => {
            b.push(flag::FLOAT);
            encode_float(b, *f);
        }
        Datum::String(s, collation) => {
            if comparable {
                encode_tagged_bytes(b, &collation.key(s), true);
            } else {
                encode_tagged_bytes(b, s.as_bytes(), false);
            }
        }
        Datum::Bytes(v) => encode_tagged_bytes(b, v, comparable),
        Datum::Time(t) => {
            b.push(flag::UINT);
            encode_uint(b, t.to_utc(tz)?.to_packed());
        }
        Datum::Duration(d) => {
            b.push(flag::DURATION);
            encode_int(b, d.nanos());
        }
        Datum::Decimal { value, precision, frac } => {
            b.push(flag::DECIMAL);
            encode_decimal(b, value, *precision, *frac)?;
        }
        Datum::Enum(e, collation) => encode_member(b, &e.name, e.value, *collation, comparable),
        Datum::Set(s, collation) => encode_member(b, &s.name, s.value, *collation, comparable),
        Datum::BinaryLiteral(bits) => encode_unsigned(b, binary_literal_to_int(bits)?, comparable),
        Datum::Json(j) => {
            b.push(flag::JSON);
            encode_json(b, j);
        }
        Datum::VectorFloat32(v) => {
            b.push(flag::VECTOR_FLOAT32);
            encode_vector(b, v);
        }
        Datum::MinNotNull => b.push(flag::BYTES),
        Datum::MaxValue => b.push(flag::MAX),
    }
    Ok(())
}

pub(crate) fn encode_signed(b: &mut Vec<u8>, v: i64, comparable: bool) {
    if comparable {
        b.push(flag::INT);
        encode_int(b, v);
    } else {
        b.push(flag::VARINT);
        encode_varint(b, v);
    }
}

pub(crate) fn encode_unsigned(b: &mut Vec<u8>, v: u64, comparable: bool) {
    if comparable {
        b.push(flag::UINT);
        encode_uint(b, v);
    } else {
        b.push(flag::UVARINT);
        encode_uvarint(b, v);
    }
}

pub(crate) fn encode_tagged_bytes(b: &mut Vec<u8>, v: &[u8], comparable: bool) {
    if comparable {
        b.push(flag::BYTES);
        encode_bytes(b, v);
    } else {
        b.push(flag::COMPACT_BYTES);
        encode_compact_bytes(b, v);
    }
}

/// Enum and set members sort by name in keys; declared positions need not
/// follow name order.
fn encode_member(b: &mut Vec<u8>, name: &str, value: u64, collation: Collation, comparable: bool) {
    if comparable {
        encode_tagged_bytes(b, &collation.key(name), true);
    } else {
        encode_unsigned(b, value, false);
    }
}

fn encode_decimal(b: &mut Vec<u8>, value: &Decimal, precision: u8, frac: u8) -> CodecResult<()> {
    let (precision, frac) = if precision == 0 {
        value.precision_and_frac()
    } else {
        (precision, frac)
    };
    let bin = value.to_bin(precision, frac)?;
    b.push(precision);
    b.push(frac);
    b.extend_from_slice(&bin);
    Ok(())
}

fn decode_decimal(b: &[u8]) -> CodecResult<(&[u8], Datum)> {
    if b.len() < 2 {
        return Err(CodecError::need(2, b.len()));
    }
    let (precision, frac) = (b[0], b[1]);
    let (value, used) = Decimal::from_bin(&b[2..], precision, frac)?;
    Ok((
        &b[2 + used..],
        Datum::Decimal {
            value,
            precision,
            frac,
        },
    ))
}

/// Decode every element of `b`.
pub fn decode(mut b: &[u8], size_hint: usize) -> CodecResult<Vec<Datum>> {
    if b.is_empty() {
        return Err(CodecError::InvalidKey("length of key is zero"));
    }
    let mut values = Vec::with_capacity(size_hint);
    while !b.is_empty() {
        let (rest, d) = decode_one(b)?;
        values.push(d);
        b = rest;
    }
    Ok(values)
}

/// Decode exactly one element and return the remainder.
///
/// Times decode as `Uint64` and enum/set/bit values as their raw encoding;
/// use [`decode_typed`] to rebuild them.
pub fn decode_one(b: &[u8]) -> CodecResult<(&[u8], Datum)> {
    let Some((&tag, b)) = b.split_first() else {
        return Err(CodecError::InvalidKey("empty input"));
    };
    match tag {
        flag::INT => decode_int(b).map(|(rest, v)| (rest, Datum::Int64(v))),
        flag::UINT => decode_uint(b).map(|(rest, v)| (rest, Datum::Uint64(v))),
        flag::VARINT => decode_varint(b).map(|(rest, v)| (rest, Datum::Int64(v))),
        flag::UVARINT => decode_uvarint(b).map(|(rest, v)| (rest, Datum::Uint64(v))),
        flag::FLOAT => decode_float(b).map(|(rest, v)| (rest, Datum::Float64(v))),
        flag::BYTES => decode_bytes(b).map(|(rest, v)| (rest, Datum::Bytes(v))),
        flag::COMPACT_BYTES => decode_compact_bytes(b).map(|(rest, v)| (rest, Datum::Bytes(v))),
        flag::DECIMAL => decode_decimal(b),
        flag::DURATION => {
            decode_int(b).map(|(rest, v)| (rest, Datum::Duration(Duration::new(v, MAX_FSP))))
        }
        flag::JSON => {
            let (j, used) = decode_json(b)?;
            Ok((&b[used..], Datum::Json(j)))
        }
        flag::VECTOR_FLOAT32 => decode_vector(b).map(|(rest, v)| (rest, Datum::VectorFloat32(v))),
        flag::NIL => Ok((b, Datum::Null)),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

/// Decode one element per column type, rebuilding kinds that the byte form
/// does not carry (times, enums, sets, bit literals, float32, strings).
pub fn decode_typed(mut b: &[u8], types: &[ColumnType], tz: &Tz) -> CodecResult<Vec<Datum>> {
    let mut values = Vec::with_capacity(types.len());
    for ty in types {
        let (rest, d) = decode_one_typed(b, ty, tz)?;
        values.push(d);
        b = rest;
    }
    if !b.is_empty() {
        return Err(CodecError::ColumnCountMismatch);
    }
    Ok(values)
}

fn decode_one_typed<'a>(b: &'a [u8], ty: &ColumnType, tz: &Tz) -> CodecResult<(&'a [u8], Datum)> {
    let (rest, raw) = decode_one(b)?;
    Ok((rest, restore_kind(raw, ty, tz)?))
}

fn restore_kind(raw: Datum, ty: &ColumnType, tz: &Tz) -> CodecResult<Datum> {
    let restored = match (ty, raw) {
        (_, Datum::Null) => Datum::Null,
        (ColumnType::Float32, Datum::Float64(f)) => Datum::Float32(f as f32),
        (ColumnType::Time { kind, fsp }, Datum::Uint64(packed)) => {
            Datum::Time(Time::from_packed(*kind, *fsp, packed)?.from_utc(tz)?)
        }
        (ColumnType::String(collation), Datum::Bytes(v)) => {
            Datum::String(String::from_utf8(v).map_err(|_| CodecError::InvalidUtf8)?, *collation)
        }
        (ColumnType::Enum { elems, collation }, Datum::Uint64(v)) => {
            Datum::Enum(Enum::from_value(elems, v)?, *collation)
        }
        (ColumnType::Enum { elems, collation }, Datum::Bytes(key)) => {
            let idx = elems
                .iter()
                .position(|e| collation.key(e) == key)
                .ok_or_else(|| CodecError::InvalidElement("enum name not declared".to_string()))?;
            Datum::Enum(Enum::from_value(elems, idx as u64 + 1)?, *collation)
        }
        (ColumnType::Set { elems, collation }, Datum::Uint64(v)) => {
            Datum::Set(Set::from_value(elems, v)?, *collation)
        }
        (ColumnType::Set { elems, collation }, Datum::Bytes(key)) => {
            let mask = match_set_key(&key, elems, *collation, 0)
                .ok_or_else(|| CodecError::InvalidElement("set name not declared".to_string()))?;
            Datum::Set(Set::from_value(elems, mask)?, *collation)
        }
        (ColumnType::Bit { width }, Datum::Uint64(v)) => {
            let len = (width.div_ceil(8) as usize).clamp(1, 8);
            Datum::BinaryLiteral(v.to_be_bytes()[8 - len..].to_vec())
        }
        (_, other) => other,
    };
    Ok(restored)
}

/// Recover the member bitmask from a set's collation key. Members appear in
/// declaration order separated by commas.
fn match_set_key(key: &[u8], elems: &[String], collation: Collation, start: usize) -> Option<u64> {
    if key.is_empty() {
        return Some(0);
    }
    let separator = collation.key(",");
    for (i, elem) in elems.iter().enumerate().skip(start) {
        let elem_key = collation.key(elem);
        let Some(rest) = key.strip_prefix(elem_key.as_slice()) else {
            continue;
        };
        if rest.is_empty() {
            return Some(1 << i);
        }
        if let Some(after) = rest.strip_prefix(separator.as_slice()) {
            if let Some(mask) = match_set_key(after, elems, collation, i + 1) {
                return Some(mask | (1 << i));
            }
        }
    }
    None
}

/// Decode a range-scan key. A lone trailing byte is read as a sentinel:
/// the null tag gives `Null`, the bytes tag gives `MinNotNull`, and the max
/// tag (or max + 1, produced by prefix-next) gives `MaxValue`.
pub fn decode_range(
    mut b: &[u8],
    size_hint: usize,
    types: Option<&[ColumnType]>,
    tz: &Tz,
) -> CodecResult<Vec<Datum>> {
    if b.is_empty() {
        return Err(CodecError::InvalidKey("length of key is zero"));
    }
    let mut values = Vec::with_capacity(size_hint);
    let mut i = 0;
    while b.len() > 1 {
        let (rest, d) = match types {
            None => decode_one(b)?,
            Some(types) => {
                let ty = types.get(i).ok_or(CodecError::ColumnCountMismatch)?;
                decode_one_typed(b, ty, tz)?
            }
        };
        values.push(d);
        b = rest;
        i += 1;
    }
    if let [last] = b {
        values.push(match *last {
            flag::NIL => Datum::Null,
            flag::BYTES => Datum::MinNotNull,
            flag::MAX | flag::MAX_NEXT => Datum::MaxValue,
            other => return Err(CodecError::InvalidFlag(other)),
        });
    }
    Ok(values)
}

/// Length of the first encoded element of `b`, without decoding it.
pub fn peek(b: &[u8]) -> CodecResult<usize> {
    let Some((&tag, payload)) = b.split_first() else {
        return Err(CodecError::InvalidKey("empty input"));
    };
    let len = match tag {
        flag::NIL => 0,
        flag::INT | flag::UINT | flag::FLOAT | flag::DURATION => 8,
        flag::BYTES => peek_bytes(payload)?,
        flag::COMPACT_BYTES => peek_compact_bytes(payload)?,
        flag::DECIMAL => peek_decimal(payload)?,
        flag::VARINT | flag::UVARINT => uvarint_len(payload)?,
        flag::JSON => peek_json(payload)?,
        flag::VECTOR_FLOAT32 => peek_vector(payload)?,
        other => return Err(CodecError::InvalidFlag(other)),
    };
    let length = 1 + len;
    if length > b.len() {
        return Err(CodecError::need(length, b.len()));
    }
    Ok(length)
}

fn peek_decimal(b: &[u8]) -> CodecResult<usize> {
    if b.len() < 2 {
        return Err(CodecError::need(2, b.len()));
    }
    check_precision(b[0], b[1])?;
    Ok(2 + decimal::bin_size(b[0], b[1]))
}

/// Split off the first encoded element: `(element, rest)`.
pub fn cut_one(b: &[u8]) -> CodecResult<(&[u8], &[u8])> {
    let l = peek(b)?;
    Ok(b.split_at(l))
}

/// Skip the tag byte and decode a varint column id.
pub fn cut_column_id(b: &[u8]) -> CodecResult<(&[u8], i64)> {
    let Some((_, rest)) = b.split_first() else {
        return Err(CodecError::InvalidKey("empty input"));
    };
    decode_varint(rest)
}

/// Fill `slots` with the raw encoded slices of consecutive elements of `data`.
pub fn set_raw_values<'a>(mut data: &'a [u8], slots: &mut [&'a [u8]]) -> CodecResult<()> {
    for slot in slots.iter_mut() {
        let (raw, rest) = cut_one(data)?;
        *slot = raw;
        data = rest;
    }
    Ok(())
}

/// Exact size of `v` in the compact value form.
pub fn estimate_value_size(v: &Datum) -> CodecResult<usize> {
    let size = match v {
        Datum::Int64(i) => 1 + varint_size(*i),
        Datum::Uint64(u) => 1 + uvarint_size(*u),
        Datum::Float32(_) | Datum::Float64(_) | Datum::Time(_) | Datum::Duration(_) => 9,
        Datum::String(s, _) => 1 + compact_bytes_size(s.len()),
        Datum::Bytes(b) => 1 + compact_bytes_size(b.len()),
        Datum::Decimal { value, precision, frac } => {
            let (p, f) = if *precision == 0 { value.precision_and_frac() } else { (*precision, *frac) };
            check_precision(p, f)?;
            1 + 2 + decimal::bin_size(p, f)
        }
        Datum::Enum(e, _) => 1 + uvarint_size(e.value),
        Datum::Set(s, _) => 1 + uvarint_size(s.value),
        Datum::BinaryLiteral(bits) => 1 + uvarint_size(binary_literal_to_int(bits)?),
        Datum::Json(j) => {
            let mut b = Vec::new();
            encode_json(&mut b, j);
            1 + b.len()
        }
        Datum::VectorFloat32(v) => 1 + serialized_size(v),
        Datum::Null | Datum::MinNotNull | Datum::MaxValue => 1,
    };
    Ok(size)
}

/// Upper-bound guess used to pre-size output buffers.
fn size_hint(v: &Datum, comparable: bool) -> usize {
    match v {
        Datum::Int64(_) | Datum::Uint64(_) | Datum::Enum(..) | Datum::Set(..) | Datum::BinaryLiteral(_)
            if !comparable =>
        {
            1 + 10
        }
        Datum::String(s, _) if comparable => 1 + comparable_bytes_size(s.len() * 2),
        Datum::Bytes(b) if comparable => 1 + comparable_bytes_size(b.len()),
        Datum::Enum(e, _) if comparable => 1 + comparable_bytes_size(e.name.len() * 2),
        Datum::Set(s, _) if comparable => 1 + comparable_bytes_size(s.name.len() * 2),
        Datum::VectorFloat32(v) => 1 + serialized_size(v),
        Datum::Json(_) => 64,
        other => estimate_value_size(other).unwrap_or(9),
    }
}
