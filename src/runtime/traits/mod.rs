// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ContainerOps, ImageOps, RuntimeInfo and the FullRuntime bundle.

mod container;
mod image;
mod runtime_info;
pub(crate) mod sealed;
mod shared_types;

pub use container::{ContainerError, ContainerFilters, ContainerOps};
pub use image::{ImageError, ImageOps};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;

/// Everything the update engine needs from a runtime, usable as `dyn FullRuntime`.
pub trait FullRuntime: ContainerOps + ImageOps + RuntimeInfo {}

impl<T: ContainerOps + ImageOps + RuntimeInfo> FullRuntime for T {}
