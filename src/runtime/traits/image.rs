// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Resolve the digest an image reference currently points to, and remove old images.

use super::sealed::Sealed;
use crate::types::{Digest, ImageId, ImageRef};
use async_trait::async_trait;

/// Image operations.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Digest the reference resolves to right now.
    ///
    /// Adapters that pull do so here; the digest returned is comparable with
    /// `ContainerRecord::digest` from the same adapter.
    async fn resolve_latest_digest(&self, reference: &ImageRef) -> Result<Digest, ImageError>;

    /// Remove an image.
    async fn remove_image(&self, id: &ImageId, force: bool) -> Result<(), ImageError>;
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("no digest available for {0}")]
    NoDigest(String),

    #[error("image in use, cannot remove: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
