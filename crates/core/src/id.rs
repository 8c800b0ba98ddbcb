//! Strongly-typed identifiers used across the scheduler.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a table or of one of its physical partitions.
///
/// Unpartitioned tables use the same id for the logical and the physical table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(i64);

impl TableId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for TableId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for TableId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for TableId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("TableId: {e}")))
    }
}

/// Identifier of one expiry run. Also used as the request id of a submission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Identifier of a scheduler node (the owner recorded on status rows).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a fresh identifier.
            ///
            /// Uses UUIDv7 (time-ordered) without hyphens. Prefer passing IDs
            /// explicitly in tests for determinism.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            /// Ids must be non-empty and made of alphanumerics, `_`, `-`, `.` or `:`.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty string", $name)));
                }
                if let Some(c) = s
                    .chars()
                    .find(|c| !c.is_alphanumeric() && !matches!(c, '_' | '-' | '.' | ':'))
                {
                    return Err(DomainError::invalid_id(format!(
                        "{}: invalid character '{}'",
                        $name, c
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

impl_string_newtype!(JobId, "JobId");
impl_string_newtype!(NodeId, "NodeId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(id.as_str().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn node_id_rejects_bad_input() {
        assert!("".parse::<NodeId>().is_err());
        assert!("node 1".parse::<NodeId>().is_err());
        assert!("node-1.dc:4000".parse::<NodeId>().is_ok());
    }

    #[test]
    fn table_id_from_str() {
        assert_eq!("42".parse::<TableId>().unwrap(), TableId::new(42));
        assert!("x".parse::<TableId>().is_err());
    }
}
