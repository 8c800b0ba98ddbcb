//! The universal value container and the column types used for typed decoding.

use std::cmp::Ordering;

use crate::collation::Collation;
use crate::decimal::Decimal;
use crate::error::{CodecError, CodecResult};
use crate::time::{Duration, Time, TimeKind};

/// An `ENUM` member: declared name and 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Enum {
    pub name: String,
    pub value: u64,
}

/// A `SET` value: comma-joined member names and the member bitmask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Set {
    pub name: String,
    pub value: u64,
}

impl Enum {
    pub fn from_value(elems: &[String], value: u64) -> CodecResult<Self> {
        if value == 0 {
            return Ok(Self {
                name: String::new(),
                value,
            });
        }
        let idx = usize::try_from(value - 1).map_err(|_| CodecError::InvalidElement(value.to_string()))?;
        elems
            .get(idx)
            .map(|name| Self {
                name: name.clone(),
                value,
            })
            .ok_or_else(|| CodecError::InvalidElement(format!("enum value {value}")))
    }
}

impl Set {
    pub fn from_value(elems: &[String], value: u64) -> CodecResult<Self> {
        if elems.len() < 64 && value >> elems.len() != 0 {
            return Err(CodecError::InvalidElement(format!("set value {value}")));
        }
        let name = elems
            .iter()
            .enumerate()
            .filter(|(i, _)| value & (1u64 << i) != 0)
            .map(|(_, e)| e.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Ok(Self { name, value })
    }
}

/// A typed scalar value.
///
/// `MinNotNull` and `MaxValue` are synthetic bounds for range keys; they are
/// never produced by decoding real data except by [`crate::decode_range`].
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Int64(i64),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    String(String, Collation),
    Bytes(Vec<u8>),
    /// `precision == 0` means "derive from the value".
    Decimal {
        value: Decimal,
        precision: u8,
        frac: u8,
    },
    Time(Time),
    Duration(Duration),
    Enum(Enum, Collation),
    Set(Set, Collation),
    BinaryLiteral(Vec<u8>),
    Json(serde_json::Value),
    VectorFloat32(Vec<f32>),
    MinNotNull,
    MaxValue,
}

impl Datum {
    /// A string under the binary collation.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into(), Collation::Binary)
    }

    /// Parse a decimal with `precision == 0`, so the encoder derives precision
    /// and scale from the value.
    ///
    /// Decoding yields the derived precision and scale, so a round-tripped
    /// value is not `==` to the one built here. Compare with [`Datum::compare`].
    pub fn decimal(s: &str) -> CodecResult<Self> {
        Ok(Self::Decimal {
            value: s.parse()?,
            precision: 0,
            frac: 0,
        })
    }

    /// SQL ordering between two values of compatible kinds.
    ///
    /// `Null < MinNotNull < any value < MaxValue`. Returns `None` for kinds
    /// that have no defined order against each other (and for JSON).
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        use Datum::*;
        let rank = |d: &Datum| match d {
            Null => 0,
            MinNotNull => 1,
            MaxValue => 3,
            _ => 2,
        };
        let (ra, rb) = (rank(self), rank(other));
        if ra != 2 || rb != 2 {
            return Some(ra.cmp(&rb));
        }
        match (self, other) {
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Uint64(a), Uint64(b)) => Some(a.cmp(b)),
            (Int64(a), Uint64(b)) => Some(cmp_int_uint(*a, *b)),
            (Uint64(a), Int64(b)) => Some(cmp_int_uint(*b, *a).reverse()),
            (Float32(_) | Float64(_), Float32(_) | Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (String(a, ca), String(b, cb)) if ca == cb => Some(ca.compare(a, b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            (Decimal { value: a, .. }, Decimal { value: b, .. }) => Some(a.cmp(b)),
            (Time(a), Time(b)) => Some(a.to_packed().cmp(&b.to_packed())),
            (Duration(a), Duration(b)) => Some(a.nanos().cmp(&b.nanos())),
            (Enum(a, ca), Enum(b, cb)) if ca == cb => Some(ca.compare(&a.name, &b.name)),
            (Set(a, ca), Set(b, cb)) if ca == cb => Some(ca.compare(&a.name, &b.name)),
            (BinaryLiteral(a), BinaryLiteral(b)) => {
                Some(binary_literal_to_int(a).ok()?.cmp(&binary_literal_to_int(b).ok()?))
            }
            (VectorFloat32(a), VectorFloat32(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(f) => Some(f64::from(*f)),
            Self::Float64(f) => Some(*f),
            _ => None,
        }
    }
}

/// Lexicographic tuple order, `None` if any element pair is incomparable.
pub fn compare_rows(a: &[Datum], b: &[Datum]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

fn cmp_int_uint(a: i64, b: u64) -> Ordering {
    if a < 0 { Ordering::Less } else { (a as u64).cmp(&b) }
}

/// Interpret a bit literal as a big-endian unsigned integer.
pub fn binary_literal_to_int(bytes: &[u8]) -> CodecResult<u64> {
    let significant = bytes.iter().position(|b| *b != 0).map_or(&[][..], |i| &bytes[i..]);
    if significant.len() > 8 {
        return Err(CodecError::BinaryLiteralOverflow);
    }
    Ok(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Column metadata needed to rebuild values that encode as a plainer kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Uint,
    Float32,
    Float64,
    String(Collation),
    Bytes,
    Decimal,
    Time { kind: TimeKind, fsp: u8 },
    Duration,
    Enum { elems: Vec<String>, collation: Collation },
    Set { elems: Vec<String>, collation: Collation },
    /// A `BIT(width)` column.
    Bit { width: u32 },
    Json,
    VectorFloat32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_bracket_everything() {
        let v = Datum::Int64(i64::MIN);
        assert_eq!(Datum::Null.compare(&Datum::MinNotNull), Some(Ordering::Less));
        assert_eq!(Datum::MinNotNull.compare(&v), Some(Ordering::Less));
        assert_eq!(v.compare(&Datum::MaxValue), Some(Ordering::Less));
        assert_eq!(Datum::MaxValue.compare(&Datum::MaxValue), Some(Ordering::Equal));
    }

    #[test]
    fn signed_unsigned_cross_compare() {
        assert_eq!(Datum::Int64(-1).compare(&Datum::Uint64(0)), Some(Ordering::Less));
        assert_eq!(Datum::Uint64(u64::MAX).compare(&Datum::Int64(i64::MAX)), Some(Ordering::Greater));
    }

    #[test]
    fn incomparable_kinds() {
        assert_eq!(Datum::Int64(1).compare(&Datum::string("1")), None);
        assert_eq!(Datum::Json(serde_json::json!(1)).compare(&Datum::Json(serde_json::json!(1))), None);
    }

    #[test]
    fn enum_and_set_members() {
        let elems = vec!["red".to_string(), "green".to_string(), "blue".to_string()];
        assert_eq!(Enum::from_value(&elems, 2).unwrap().name, "green");
        assert_eq!(Enum::from_value(&elems, 0).unwrap().name, "");
        assert!(Enum::from_value(&elems, 4).is_err());
        assert_eq!(Set::from_value(&elems, 0b101).unwrap().name, "red,blue");
        assert!(Set::from_value(&elems, 0b1000).is_err());
    }

    #[test]
    fn bit_literals() {
        assert_eq!(binary_literal_to_int(&[0, 0, 1, 2]).unwrap(), 0x0102);
        assert_eq!(binary_literal_to_int(&[]).unwrap(), 0);
        assert_eq!(binary_literal_to_int(&[1; 9]), Err(CodecError::BinaryLiteralOverflow));
    }
}
