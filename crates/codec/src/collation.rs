//! String collations used by comparable and hash encodings.

use std::cmp::Ordering;

use crate::error::{CodecError, CodecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Collation {
    /// Raw byte comparison, trailing spaces significant.
    #[default]
    Binary,
    /// Code point comparison with PAD SPACE semantics.
    Utf8Mb4Bin,
    /// Case-insensitive comparison with PAD SPACE semantics.
    Utf8Mb4GeneralCi,
}

impl Collation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Utf8Mb4Bin => "utf8mb4_bin",
            Self::Utf8Mb4GeneralCi => "utf8mb4_general_ci",
        }
    }

    pub fn from_name(name: &str) -> CodecResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "utf8mb4_bin" | "utf8_bin" => Ok(Self::Utf8Mb4Bin),
            "utf8mb4_general_ci" | "utf8_general_ci" => Ok(Self::Utf8Mb4GeneralCi),
            other => Err(CodecError::Unsupported(format!("collation {other}"))),
        }
    }

    /// Sort key: two strings compare equal under this collation iff their
    /// keys are byte-equal, and key byte order is the collation order.
    pub fn key(&self, s: &str) -> Vec<u8> {
        match self {
            Self::Binary => s.as_bytes().to_vec(),
            Self::Utf8Mb4Bin => s.trim_end_matches(' ').as_bytes().to_vec(),
            Self::Utf8Mb4GeneralCi => {
                let trimmed = s.trim_end_matches(' ');
                let mut key = Vec::with_capacity(trimmed.len() * 2);
                for c in trimmed.chars() {
                    key.extend_from_slice(&general_ci_weight(c).to_be_bytes());
                }
                key
            }
        }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }
}

/// Characters outside the basic plane all share the replacement weight.
fn general_ci_weight(c: char) -> u16 {
    let mut upper = c.to_uppercase();
    let folded = match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    };
    u16::try_from(u32::from(folded)).unwrap_or(0xFFFD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_space_semantics() {
        assert_eq!(Collation::Utf8Mb4Bin.compare("abc", "abc   "), Ordering::Equal);
        assert_ne!(Collation::Binary.compare("abc", "abc "), Ordering::Equal);
    }

    #[test]
    fn general_ci_folds_case() {
        let ci = Collation::Utf8Mb4GeneralCi;
        assert_eq!(ci.key("Straße"), ci.key("STRAßE"));
        assert_eq!(ci.compare("apple", "APPLE "), Ordering::Equal);
        assert_eq!(ci.compare("apple", "Banana"), Ordering::Less);
        assert_eq!(ci.key("😀"), ci.key("😃"));
    }

    #[test]
    fn names_round_trip() {
        for c in [Collation::Binary, Collation::Utf8Mb4Bin, Collation::Utf8Mb4GeneralCi] {
            assert_eq!(Collation::from_name(c.name()).unwrap(), c);
        }
        assert!(Collation::from_name("latin1_swedish_ci").is_err());
    }
}
