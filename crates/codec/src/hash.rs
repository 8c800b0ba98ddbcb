//! Hash-mode encoding: lossless, collation-aware, no ordering guarantee.
//!
//! Two values that compare equal produce identical bytes: `-0.0` and `0.0`,
//! `1.50` and `1.5`, `b'0001'` and `b'01'`, or strings equal under their
//! collation.

use crate::codec::{encode_signed, encode_tagged_bytes, encode_unsigned};
use crate::datum::{Datum, binary_literal_to_int};
use crate::error::CodecResult;
use crate::flag;
use crate::float::encode_float;
use crate::json::encode_json;
use crate::number::{encode_int, encode_uint};
use crate::vector::encode_vector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashOptions {
    /// Hash enum and set members by position instead of by name.
    pub enum_as_int: bool,
}

/// Append the hash form of `d` to `b`.
pub fn hash_code(b: &mut Vec<u8>, d: &Datum, opts: HashOptions) -> CodecResult<()> {
    match d {
        Datum::Null => b.push(flag::NIL),
        Datum::Int64(i) => encode_signed(b, *i, false),
        Datum::Uint64(u) => encode_unsigned(b, *u, false),
        Datum::Float32(f) => {
            b.push(flag::FLOAT);
            encode_float(b, f64::from(*f));
        }
        Datum::Float64(f) => {
            b.push(flag::FLOAT);
            encode_float(b, *f);
        }
        Datum::String(s, collation) => encode_tagged_bytes(b, &collation.key(s), false),
        Datum::Bytes(v) => encode_tagged_bytes(b, v, false),
        Datum::Time(t) => {
            b.push(flag::UINT);
            encode_uint(b, t.to_packed());
        }
        Datum::Duration(d) => {
            b.push(flag::DURATION);
            encode_int(b, d.nanos());
        }
        Datum::Decimal { value, .. } => {
            b.push(flag::DECIMAL);
            encode_tagged_bytes(b, value.normalized().to_string().as_bytes(), false);
        }
        Datum::Enum(e, collation) => {
            if opts.enum_as_int {
                encode_unsigned(b, e.value, false);
            } else {
                encode_tagged_bytes(b, &collation.key(&e.name), false);
            }
        }
        Datum::Set(s, collation) => {
            if opts.enum_as_int {
                encode_unsigned(b, s.value, false);
            } else {
                encode_tagged_bytes(b, &collation.key(&s.name), false);
            }
        }
        Datum::BinaryLiteral(bits) => encode_unsigned(b, binary_literal_to_int(bits)?, true),
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

/// Hash form of a whole row, suitable as a grouping or join key.
pub fn hash_row(values: &[Datum], opts: HashOptions) -> CodecResult<Vec<u8>> {
    let mut b = Vec::with_capacity(values.len() * 10);
    for d in values {
        hash_code(&mut b, d, opts)?;
    }
    Ok(b)
}

/// Whether two rows fall into the same hash group.
pub fn equal_hash_rows(a: &[Datum], b: &[Datum], opts: HashOptions) -> CodecResult<bool> {
    Ok(a.len() == b.len() && hash_row(a, opts)? == hash_row(b, opts)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::Collation;
    use crate::datum::Enum;
    use proptest::prelude::*;

    fn h(d: Datum) -> Vec<u8> {
        hash_row(&[d], HashOptions::default()).unwrap()
    }

    #[test]
    fn negative_zero_hashes_like_zero() {
        assert_eq!(h(Datum::Float64(-0.0)), h(Datum::Float64(0.0)));
        assert_eq!(h(Datum::Float32(-0.0)), h(Datum::Float32(0.0)));
        assert_eq!(h(Datum::Float32(0.0)), h(Datum::Float64(0.0)));
    }

    #[test]
    fn decimals_hash_by_normalized_value() {
        assert_eq!(h(Datum::decimal("1.50").unwrap()), h(Datum::decimal("1.5").unwrap()));
        assert_eq!(h(Datum::decimal("-0.0").unwrap()), h(Datum::decimal("0").unwrap()));
        assert_ne!(h(Datum::decimal("1.51").unwrap()), h(Datum::decimal("1.5").unwrap()));
    }

    #[test]
    fn strings_hash_under_their_collation() {
        let ci = Collation::Utf8Mb4GeneralCi;
        assert_eq!(h(Datum::String("Hello ".into(), ci)), h(Datum::String("hELLO".into(), ci)));
        assert_ne!(h(Datum::string("Hello")), h(Datum::string("hello")));
    }

    #[test]
    fn enums_hash_by_name_unless_configured() {
        let a = Datum::Enum(Enum { name: "x".into(), value: 1 }, Collation::Binary);
        let b = Datum::Enum(Enum { name: "x".into(), value: 2 }, Collation::Binary);
        assert!(equal_hash_rows(&[a.clone()], &[b.clone()], HashOptions::default()).unwrap());
        let by_int = HashOptions { enum_as_int: true };
        assert!(!equal_hash_rows(&[a], &[b], by_int).unwrap());
    }

    #[test]
    fn bit_literals_hash_by_numeric_value() {
        assert_eq!(h(Datum::BinaryLiteral(vec![0, 0, 1])), h(Datum::BinaryLiteral(vec![1])));
    }

    #[test]
    fn rows_of_different_length_differ() {
        let opts = HashOptions::default();
        assert!(!equal_hash_rows(&[Datum::Null], &[Datum::Null, Datum::Null], opts).unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn equal_ints_hash_equal(v in any::<i64>()) {
            prop_assert_eq!(h(Datum::Int64(v)), h(Datum::Int64(v)));
            prop_assert_ne!(h(Datum::Int64(v)), h(Datum::Int64(v.wrapping_add(1))));
        }
    }
}
