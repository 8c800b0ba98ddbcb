//! Fixed-point decimal and its order-preserving binary form.
//!
//! The binary form stores the integer part and the fraction part as groups
//! of nine decimal digits, each group as a big-endian word. Leading and
//! trailing partial groups use the minimal byte width for their digit
//! count. Negative values have every byte inverted, and the first byte has
//! its top bit flipped. For a fixed `(precision, frac)` pair, comparing two
//! encodings byte by byte gives the same result as comparing the numbers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, CodecResult};

pub const MAX_PRECISION: u8 = 65;
pub const MAX_FRACTION: u8 = 30;

const DIGITS_PER_WORD: usize = 9;
const WORD_SIZE: usize = 4;
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

#[derive(Debug, Clone, Default)]
pub struct Decimal {
    negative: bool,
    /// Integer digits without leading zeros; empty for values below one.
    int_digits: Vec<u8>,
    /// Fraction digits as written, trailing zeros included.
    frac_digits: Vec<u8>,
}

impl Decimal {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.int_digits.is_empty() && self.frac_digits.iter().all(|d| *d == 0)
    }

    pub fn is_negative(&self) -> bool {
        self.negative && !self.is_zero()
    }

    /// Number of significant digits and fraction digits of this value.
    pub fn precision_and_frac(&self) -> (u8, u8) {
        let frac = self.frac_digits.len();
        let precision = (self.int_digits.len() + frac).max(1);
        (precision.min(usize::from(u8::MAX)) as u8, frac.min(usize::from(u8::MAX)) as u8)
    }

    /// The same value with trailing fraction zeros removed and the sign of
    /// zero cleared.
    pub fn normalized(&self) -> Self {
        let mut frac_digits = self.frac_digits.clone();
        while frac_digits.last() == Some(&0) {
            frac_digits.pop();
        }
        let mut out = Self {
            negative: self.negative,
            int_digits: self.int_digits.clone(),
            frac_digits,
        };
        if out.is_zero() {
            out.negative = false;
        }
        out
    }

    /// Serialize as the order-preserving binary form for `(precision, frac)`.
    pub fn to_bin(&self, precision: u8, frac: u8) -> CodecResult<Vec<u8>> {
        check_precision(precision, frac)?;
        let digits_int = usize::from(precision - frac);
        let frac = usize::from(frac);

        if self.int_digits.len() > digits_int {
            return Err(CodecError::DecimalOverflow(format!(
                "{self} does not fit in DECIMAL({precision},{frac})"
            )));
        }
        if self.frac_digits.iter().skip(frac).any(|d| *d != 0) {
            return Err(CodecError::DecimalTruncated(format!(
                "{self} has more than {frac} fraction digits"
            )));
        }

        let mut int_part = vec![0u8; digits_int - self.int_digits.len()];
        int_part.extend_from_slice(&self.int_digits);
        let mut frac_part: Vec<u8> = self.frac_digits.iter().copied().take(frac).collect();
        frac_part.resize(frac, 0);

        let mut bin = Vec::with_capacity(bin_size(precision, frac as u8));
        let leading = digits_int % DIGITS_PER_WORD;
        write_word(&mut bin, &int_part[..leading]);
        for word in int_part[leading..].chunks(DIGITS_PER_WORD) {
            write_word(&mut bin, word);
        }
        for word in frac_part.chunks(DIGITS_PER_WORD) {
            write_word(&mut bin, word);
        }

        if self.is_negative() {
            bin.iter_mut().for_each(|b| *b = !*b);
        }
        if let Some(first) = bin.first_mut() {
            *first ^= 0x80;
        }
        Ok(bin)
    }

    /// Read a value written by [`Decimal::to_bin`]; returns the value and
    /// the number of bytes consumed.
    pub fn from_bin(b: &[u8], precision: u8, frac: u8) -> CodecResult<(Self, usize)> {
        check_precision(precision, frac)?;
        let size = bin_size(precision, frac);
        if b.len() < size {
            return Err(CodecError::need(size, b.len()));
        }
        let mut raw = b[..size].to_vec();
        let negative = raw.first().is_some_and(|first| first & 0x80 == 0);
        if let Some(first) = raw.first_mut() {
            *first ^= 0x80;
        }
        if negative {
            raw.iter_mut().for_each(|b| *b = !*b);
        }

        let digits_int = usize::from(precision - frac);
        let frac = usize::from(frac);
        let mut cursor = &raw[..];
        let mut int_digits = Vec::with_capacity(digits_int);
        let leading = digits_int % DIGITS_PER_WORD;
        read_word(&mut cursor, leading, &mut int_digits)?;
        for _ in 0..digits_int / DIGITS_PER_WORD {
            read_word(&mut cursor, DIGITS_PER_WORD, &mut int_digits)?;
        }
        let mut frac_digits = Vec::with_capacity(frac);
        for _ in 0..frac / DIGITS_PER_WORD {
            read_word(&mut cursor, DIGITS_PER_WORD, &mut frac_digits)?;
        }
        read_word(&mut cursor, frac % DIGITS_PER_WORD, &mut frac_digits)?;

        let first_significant = int_digits.iter().position(|d| *d != 0).unwrap_or(int_digits.len());
        int_digits.drain(..first_significant);
        let mut value = Self {
            negative,
            int_digits,
            frac_digits,
        };
        if value.is_zero() {
            value.negative = false;
        }
        Ok((value, size))
    }
}

/// Encoded size of the binary form for `(precision, frac)`.
pub fn bin_size(precision: u8, frac: u8) -> usize {
    let digits_int = usize::from(precision.saturating_sub(frac));
    let frac = usize::from(frac);
    (digits_int / DIGITS_PER_WORD) * WORD_SIZE
        + DIG_TO_BYTES[digits_int % DIGITS_PER_WORD]
        + (frac / DIGITS_PER_WORD) * WORD_SIZE
        + DIG_TO_BYTES[frac % DIGITS_PER_WORD]
}

pub(crate) fn check_precision(precision: u8, frac: u8) -> CodecResult<()> {
    if precision == 0 || precision > MAX_PRECISION || frac > MAX_FRACTION || frac > precision {
        return Err(CodecError::InvalidDecimal(format!(
            "invalid precision/frac ({precision},{frac})"
        )));
    }
    Ok(())
}

fn write_word(bin: &mut Vec<u8>, digits: &[u8]) {
    let width = DIG_TO_BYTES[digits.len()];
    let value = digits.iter().fold(0u32, |acc, d| acc * 10 + u32::from(*d));
    bin.extend_from_slice(&value.to_be_bytes()[WORD_SIZE - width..]);
}

fn read_word(cursor: &mut &[u8], digits: usize, out: &mut Vec<u8>) -> CodecResult<()> {
    let width = DIG_TO_BYTES[digits];
    if cursor.len() < width {
        return Err(CodecError::need(width, cursor.len()));
    }
    let value = cursor[..width]
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
    *cursor = &cursor[width..];
    if digits > 0 && u64::from(value) >= 10u64.pow(digits as u32) {
        return Err(CodecError::InvalidDecimal(format!("bad digit group {value}")));
    }
    let mut rendered = vec![0u8; digits];
    let mut rest = value;
    for slot in rendered.iter_mut().rev() {
        *slot = (rest % 10) as u8;
        rest /= 10;
    }
    out.extend_from_slice(&rendered);
    Ok(())
}

impl FromStr for Decimal {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, body) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_str, frac_str) = body.split_once('.').unwrap_or((body, ""));
        if int_str.is_empty() && frac_str.is_empty() {
            return Err(CodecError::InvalidDecimal(s.to_string()));
        }
        let digits = |part: &str| -> CodecResult<Vec<u8>> {
            part.bytes()
                .map(|c| {
                    if c.is_ascii_digit() {
                        Ok(c - b'0')
                    } else {
                        Err(CodecError::InvalidDecimal(s.to_string()))
                    }
                })
                .collect()
        };
        let mut int_digits = digits(int_str)?;
        let frac_digits = digits(frac_str)?;
        let first_significant = int_digits.iter().position(|d| *d != 0).unwrap_or(int_digits.len());
        int_digits.drain(..first_significant);
        if int_digits.len() + frac_digits.len() > usize::from(MAX_PRECISION) + usize::from(MAX_FRACTION) {
            return Err(CodecError::DecimalOverflow(s.to_string()));
        }
        let mut value = Self {
            negative,
            int_digits,
            frac_digits,
        };
        if value.is_zero() {
            value.negative = false;
        }
        Ok(value)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            f.write_str("-")?;
        }
        if self.int_digits.is_empty() {
            f.write_str("0")?;
        }
        for d in &self.int_digits {
            write!(f, "{d}")?;
        }
        if !self.frac_digits.is_empty() {
            f.write_str(".")?;
            for d in &self.frac_digits {
                write!(f, "{d}")?;
            }
        }
        Ok(())
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (false, true) => return Ordering::Greater,
            (true, false) => return Ordering::Less,
            _ => {}
        }
        let magnitude = self
            .int_digits
            .len()
            .cmp(&other.int_digits.len())
            .then_with(|| self.int_digits.cmp(&other.int_digits))
            .then_with(|| {
                let len = self.frac_digits.len().max(other.frac_digits.len());
                let pad = |d: &[u8]| {
                    let mut v = d.to_vec();
                    v.resize(len, 0);
                    v
                };
                pad(&self.frac_digits).cmp(&pad(&other.frac_digits))
            });
        if self.is_negative() { magnitude.reverse() } else { magnitude }
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Numeric equality: `1.50 == 1.5`.
impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(dec("007.250").to_string(), "7.250");
        assert_eq!(dec("-0.00").to_string(), "0.00");
        assert_eq!(dec(".5").to_string(), "0.5");
        assert_eq!(dec("-12").to_string(), "-12");
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("".parse::<Decimal>().is_err());
        assert!("-".parse::<Decimal>().is_err());
    }

    #[test]
    fn normalization_drops_trailing_zeros() {
        assert_eq!(dec("1.500").normalized().to_string(), "1.5");
        assert_eq!(dec("-0.000").normalized().to_string(), "0");
        assert_eq!(dec("1.500"), dec("1.5"));
    }

    #[test]
    fn precision_and_frac() {
        assert_eq!(dec("123.45").precision_and_frac(), (5, 2));
        assert_eq!(dec("0.5").precision_and_frac(), (1, 1));
        assert_eq!(dec("0").precision_and_frac(), (1, 0));
    }

    #[test]
    fn bin_layout_matches_sizes() {
        assert_eq!(bin_size(14, 4), 7);
        let bin = dec("1234567890.1234").to_bin(14, 4).unwrap();
        assert_eq!(bin.len(), 7);
        let (back, used) = Decimal::from_bin(&bin, 14, 4).unwrap();
        assert_eq!(used, 7);
        assert_eq!(back.to_string(), "1234567890.1234");
    }

    #[test]
    fn overflow_and_truncation_are_errors() {
        assert!(matches!(dec("1000").to_bin(5, 2), Err(CodecError::DecimalOverflow(_))));
        assert!(matches!(dec("1.234").to_bin(5, 2), Err(CodecError::DecimalTruncated(_))));
        assert!(dec("1.230").to_bin(5, 2).is_ok());
        assert!(matches!(dec("1").to_bin(0, 0), Err(CodecError::InvalidDecimal(_))));
    }

    #[test]
    fn from_bin_rejects_short_input() {
        assert_eq!(Decimal::from_bin(&[0x80], 10, 2), Err(CodecError::need(5, 1)));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn binary_form_preserves_order(a in -99_999_999_999i64..99_999_999_999, b in -99_999_999_999i64..99_999_999_999) {
            // Interpret the integers as values with 4 fraction digits.
            let render = |v: i64| {
                let sign = if v < 0 { "-" } else { "" };
                let abs = v.unsigned_abs();
                format!("{sign}{}.{:04}", abs / 10_000, abs % 10_000)
            };
            let (da, db) = (dec(&render(a)), dec(&render(b)));
            let (ba, bb) = (da.to_bin(12, 4).unwrap(), db.to_bin(12, 4).unwrap());
            prop_assert_eq!(a.cmp(&b), ba.cmp(&bb));
            prop_assert_eq!(a.cmp(&b), da.cmp(&db));
            let (back, _) = Decimal::from_bin(&ba, 12, 4).unwrap();
            prop_assert_eq!(back.to_string(), render(a).replace("-0.0000", "0.0000"));
        }
    }
}
