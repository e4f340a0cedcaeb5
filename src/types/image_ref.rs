// ABOUTME: Container image reference parsing and validation.
// ABOUTME: Handles nginx, nginx:tag, registry:port/image:tag@digest and repo-digest matching.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::digest::Digest;

const DEFAULT_REGISTRY: &str = "docker.io";
const OFFICIAL_NAMESPACE: &str = "library/";

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        for c in input.chars() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '@') {
                return Err(ParseImageRefError::InvalidChar(c));
            }
        }

        let (without_digest, digest) = match input.split_once('@') {
            Some((before, after)) if !after.is_empty() => (before, Some(after.to_string())),
            Some(_) => return Err(ParseImageRefError::InvalidFormat(input.to_string())),
            None => (input, None),
        };

        // A colon followed by a slash belongs to a registry port, not a tag.
        let (without_tag, tag) = match without_digest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => (before, Some(after.to_string())),
            _ => (without_digest, None),
        };

        if without_tag.is_empty() || without_tag.ends_with('/') || tag.as_deref() == Some("") {
            return Err(ParseImageRefError::InvalidFormat(input.to_string()));
        }

        let (registry, name) = Self::parse_registry_and_name(without_tag);

        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    fn parse_registry_and_name(input: &str) -> (Option<String>, String) {
        match input.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, input.to_string()),
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// A reference that names an exact digest can never go stale.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// The same reference with any `@digest` suffix dropped.
    pub fn without_digest(&self) -> Self {
        let tag = self.tag.clone().or_else(|| Some("latest".to_string()));
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag,
            digest: None,
        }
    }

    /// The same repository and tag pinned to `digest`.
    pub fn with_digest(&self, digest: &Digest) -> Self {
        Self {
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }

    /// Repository in the short form the engine reports in `RepoDigests`:
    /// `nginx` rather than `docker.io/library/nginx`.
    pub fn familiar_repository(&self) -> String {
        let name = self.name.strip_prefix(OFFICIAL_NAMESPACE).unwrap_or(&self.name);
        match self.registry.as_deref() {
            None | Some(DEFAULT_REGISTRY) => name.to_string(),
            Some(registry) => format!("{}/{}", registry, self.name),
        }
    }

    /// Pick the digest for this repository out of an image's `RepoDigests`.
    pub fn match_repo_digest<'a, I>(&self, repo_digests: I) -> Option<Digest>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted = self.familiar_repository();
        repo_digests.into_iter().find_map(|entry| {
            let (repo, digest) = entry.split_once('@')?;
            let repo = ImageRef::parse(repo).ok()?;
            if repo.familiar_repository() == wanted {
                Digest::parse(digest).ok()
            } else {
                None
            }
        })
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ParseImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ImageRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_latest() {
        let image = ImageRef::parse("nginx").unwrap();
        assert_eq!(image.tag(), Some("latest"));
        assert_eq!(image.to_string(), "nginx:latest");
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let image = ImageRef::parse("localhost:5000/app").unwrap();
        assert_eq!(image.registry(), Some("localhost:5000"));
        assert_eq!(image.name(), "app");
        assert_eq!(image.tag(), Some("latest"));
    }

    #[test]
    fn digest_reference_is_pinned() {
        let image = ImageRef::parse("redis:7@sha256:abcd").unwrap();
        assert!(image.is_pinned());
        assert_eq!(image.without_digest().to_string(), "redis:7");
    }

    #[test]
    fn dangling_at_is_rejected() {
        assert!(ImageRef::parse("redis@").is_err());
    }

    #[test]
    fn familiar_repository_collapses_docker_hub() {
        let a = ImageRef::parse("docker.io/library/nginx:1.25").unwrap();
        let b = ImageRef::parse("nginx").unwrap();
        assert_eq!(a.familiar_repository(), "nginx");
        assert_eq!(a.familiar_repository(), b.familiar_repository());
    }

    #[test]
    fn repo_digest_matches_by_repository() {
        let image = ImageRef::parse("ghcr.io/acme/api:2").unwrap();
        let digests = [
            "nginx@sha256:1111",
            "ghcr.io/acme/api@sha256:2222",
        ];
        let digest = image.match_repo_digest(digests.iter().copied()).unwrap();
        assert_eq!(digest.as_str(), "sha256:2222");
    }
}
