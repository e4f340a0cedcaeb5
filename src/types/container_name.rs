// ABOUTME: Validated container (or swarm service) name.
// ABOUTME: Follows the engine's [a-zA-Z0-9][a-zA-Z0-9_.-]* rule and strips the leading slash.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use super::id::ContainerId;

#[derive(Debug, Error)]
pub enum ContainerNameError {
    #[error("container name cannot be empty")]
    Empty,

    #[error("container name must start with a letter or digit: {0}")]
    BadStart(String),

    #[error("invalid character in container name: '{0}'")]
    InvalidChar(char),
}

/// A container name as the dependency graph and reports know it.
///
/// Ordering is plain byte order, which is the tie-break rule for
/// replacement order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(value: &str) -> Result<Self, ContainerNameError> {
        let value = value.strip_prefix('/').unwrap_or(value);
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(ContainerNameError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(ContainerNameError::BadStart(value.to_string()));
        }
        let invalid = chars.find(|&c| !c.is_ascii_alphanumeric() && !matches!(c, '_' | '.' | '-'));
        if let Some(c) = invalid {
            return Err(ContainerNameError::InvalidChar(c));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name the old container is parked under while its replacement starts.
    pub fn parked(&self, id: &ContainerId) -> ContainerName {
        ContainerName(format!("{}-lookout-old-{}", self.0, id.short()))
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ContainerName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContainerName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_engine_slash() {
        assert_eq!(ContainerName::new("/web").unwrap().as_str(), "web");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(matches!(ContainerName::new(""), Err(ContainerNameError::Empty)));
        assert!(matches!(
            ContainerName::new("-web"),
            Err(ContainerNameError::BadStart(_))
        ));
        assert!(matches!(
            ContainerName::new("web app"),
            Err(ContainerNameError::InvalidChar(' '))
        ));
    }

    #[test]
    fn parked_name_carries_short_id() {
        let name = ContainerName::new("db").unwrap();
        let parked = name.parked(&ContainerId::new("0123456789abcdef"));
        assert_eq!(parked.as_str(), "db-lookout-old-0123456789ab");
        assert!(ContainerName::new(parked.as_str()).is_ok());
    }
}
