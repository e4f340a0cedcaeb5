// ABOUTME: Sealed trait pattern for runtime traits.
// ABOUTME: Only adapters in this crate can implement the capability traits.

/// Sealed trait to prevent external implementations.
///
/// New methods can be added to the capability traits without breaking
/// downstream code, since nothing outside the crate can implement them.
pub trait Sealed {}
