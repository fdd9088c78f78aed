//! Strongly-typed identifiers used across the platform.
//!
//! Every identifier ends up as a segment of a coordination-store path or a
//! topic name, so construction validates that it is a single, safe segment.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum length (in bytes) of any identifier.
pub const MAX_ID_LEN: usize = 128;

/// Identifier of a platform instance (the outermost naming scope).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

/// Identifier of a tenant (multi-tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// Identifier of a module, i.e. one deployable, tenant-aware service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleId(String);

/// Check that `value` is usable as a single path segment.
pub fn validate_segment(kind: &str, value: &str) -> Result<(), DomainError> {
    if value.is_empty() {
        return Err(DomainError::invalid_id(format!("{kind}: must not be empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(DomainError::invalid_id(format!(
            "{kind}: longer than {MAX_ID_LEN} bytes"
        )));
    }
    if value == "." || value == ".." {
        return Err(DomainError::invalid_id(format!("{kind}: '{value}' is reserved")));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(DomainError::invalid_id(format!(
            "{kind}: invalid character {c:?} in '{value}'"
        )));
    }
    Ok(())
}

macro_rules! impl_segment_newtype {
    ($t:ident, $name:literal) => {
        impl $t {
            /// Validate and wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                validate_segment($name, &value)?;
                Ok(Self(value))
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

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_segment_newtype!(InstanceId, "InstanceId");
impl_segment_newtype!(TenantId, "TenantId");
impl_segment_newtype!(ModuleId, "ModuleId");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_segments() {
        assert_eq!(TenantId::new("acme").unwrap().as_str(), "acme");
        assert!(ModuleId::new("device-management").is_ok());
        assert!(InstanceId::new("prod_eu.1").is_ok());
    }

    #[test]
    fn rejects_path_injection_and_reserved_names() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("a/b").is_err());
        assert!(TenantId::new("..").is_err());
        assert!(TenantId::new("with space").is_err());
        assert!(TenantId::new("x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn serde_goes_through_validation() {
        let id: TenantId = serde_json::from_str("\"acme\"").unwrap();
        assert_eq!(id.as_str(), "acme");
        assert!(serde_json::from_str::<TenantId>("\"../etc\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acme\"");
    }

    proptest! {
        #[test]
        fn valid_ids_never_contain_separators(s in "[A-Za-z0-9_-][A-Za-z0-9._-]{0,40}") {
            let id = TenantId::new(s.clone()).unwrap();
            prop_assert!(!id.as_str().contains('/'));
            prop_assert_eq!(id.to_string(), s);
        }

        #[test]
        fn ids_with_slash_are_rejected(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let joined = format!("{a}/{b}");
            prop_assert!(ModuleId::new(joined).is_err());
        }
    }
}
