// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Phantom-typed IDs, image references, digests and container names.

mod container_name;
mod digest;
mod id;
mod image_ref;

pub use container_name::{ContainerName, ContainerNameError};
pub use digest::{Digest, DigestError};
pub use id::{ContainerId, ImageId};
pub use image_ref::{ImageRef, ParseImageRefError};
