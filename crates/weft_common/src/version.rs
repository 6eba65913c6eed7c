//! Pinned version identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An immutable identifier naming an upstream revision or release.
///
/// A `VersionRef` is pinned once per build configuration. It is never mutated
/// during a run, and every cache key derived from upstream input includes it,
/// so changing it invalidates all downstream caches.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRef(String);

/// Error returned for an empty or malformed version identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version ref '{0}': expected a non-empty name of [A-Za-z0-9._+/-]")]
pub struct InvalidVersionRef(pub String);

impl VersionRef {
    /// Validates and wraps a version identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidVersionRef> {
        let value = value.into();
        let valid = !value.is_empty()
            && !value.starts_with('-')
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '/' | '-'));
        if valid {
            Ok(Self(value))
        } else {
            Err(InvalidVersionRef(value))
        }
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VersionRef {
    type Err = InvalidVersionRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VersionRef {
    type Error = InvalidVersionRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionRef> for String {
    fn from(value: VersionRef) -> Self {
        value.0
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionRef({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_release_and_revision() {
        assert!(VersionRef::new("1.20.4").is_ok());
        assert!(VersionRef::new("a1b2c3d4e5").is_ok());
        assert!(VersionRef::new("origin/ver/1.20.4").is_ok());
        assert!(VersionRef::new("1.20.4-R0.1+build.7").is_ok());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(VersionRef::new("").is_err());
        assert!(VersionRef::new("1.20 4").is_err());
        assert!(VersionRef::new("--upload-pack=x").is_err());
    }

    #[test]
    fn display_is_raw_value() {
        let v: VersionRef = "1.20.4".parse().unwrap();
        assert_eq!(v.to_string(), "1.20.4");
        assert_eq!(v.as_str(), "1.20.4");
    }

    #[test]
    fn serde_validates() {
        let ok: VersionRef = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(ok.as_str(), "abc123");
        assert!(serde_json::from_str::<VersionRef>("\"\"").is_err());
    }
}
