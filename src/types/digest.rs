// ABOUTME: Content digest of an image, the only identity two image versions are compared by.
// ABOUTME: Validates the algorithm:hex shape the engine and registries report.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("digest cannot be empty")]
    Empty,

    #[error("digest must look like algorithm:hex, got {0}")]
    Malformed(String),
}

/// An image content digest such as `sha256:9f86d0...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    pub fn parse(value: &str) -> Result<Self, DigestError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DigestError::Empty);
        }
        let Some((algorithm, hex)) = value.split_once(':') else {
            return Err(DigestError::Malformed(value.to_string()));
        };
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let hex_ok = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        if !algorithm_ok || !hex_ok {
            return Err(DigestError::Malformed(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and notifications.
    pub fn short(&self) -> &str {
        let hex = self.0.split_once(':').map_or(self.0.as_str(), |(_, h)| h);
        &hex[..hex.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_case() {
        let digest = Digest::parse("sha256:ABCDEF0123").unwrap();
        assert_eq!(digest.as_str(), "sha256:abcdef0123");
        assert_eq!(digest.short(), "abcdef0123");
    }

    #[test]
    fn rejects_missing_algorithm() {
        assert!(matches!(
            Digest::parse("abcdef"),
            Err(DigestError::Malformed(_))
        ));
        assert!(Digest::parse(":abc").is_err());
        assert!(Digest::parse("sha256:xyz").is_err());
    }
}
