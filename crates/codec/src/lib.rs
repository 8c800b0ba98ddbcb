//! `sweepd-codec` — binary encodings for typed values.
//!
//! Two encodings share one tag space:
//!
//! - **key** (comparable) mode: byte order of the output equals the SQL
//!   order of the input tuple, so encodings can be used as storage keys
//!   and range bounds;
//! - **value** (compact) mode: smallest form that round-trips exactly.
//!
//! A third, hash mode produces identical bytes for values that compare
//! equal (see [`hash_code`]).
//!
//! Each element is one tag byte followed by a type-specific payload. Tag
//! values are part of the stored format and must never be reassigned.

pub mod bytes;
mod codec;
pub mod collation;
pub mod datum;
pub mod decimal;
pub mod error;
pub mod float;
mod hash;
pub mod json;
pub mod number;
pub mod time;
pub mod vector;

pub use codec::{
    cut_column_id, cut_one, decode, decode_one, decode_range, decode_typed, encode_into, encode_key,
    encode_value, estimate_value_size, peek, set_raw_values,
};
pub use collation::Collation;
pub use datum::{ColumnType, Datum, Enum, Set, compare_rows};
pub use decimal::Decimal;
pub use error::{CodecError, CodecResult};
pub use hash::{HashOptions, equal_hash_rows, hash_code, hash_row};
pub use time::{Duration, Time, TimeKind};

/// Element tags.
pub mod flag {
    pub const NIL: u8 = 0;
    pub const BYTES: u8 = 1;
    pub const COMPACT_BYTES: u8 = 2;
    pub const INT: u8 = 3;
    pub const UINT: u8 = 4;
    pub const FLOAT: u8 = 5;
    pub const DECIMAL: u8 = 6;
    pub const DURATION: u8 = 7;
    pub const VARINT: u8 = 8;
    pub const UVARINT: u8 = 9;
    pub const JSON: u8 = 10;
    pub const VECTOR_FLOAT32: u8 = 20;
    pub const MAX: u8 = 250;
    /// `MAX + 1`, produced when computing the prefix-next of a max key.
    pub const MAX_NEXT: u8 = 251;
}
