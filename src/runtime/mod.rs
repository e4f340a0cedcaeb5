// ABOUTME: Container runtime adapters behind one capability interface.
// ABOUTME: Standalone engine, swarm services and an in-memory runtime.

mod bollard;
mod connect;
mod error;
pub mod memory;
mod swarm;
pub mod traits;
mod types;

pub use self::bollard::BollardRuntime;
pub use connect::connect;
pub use error::{RuntimeError, RuntimeErrorKind};
pub use memory::MemoryRuntime;
pub use swarm::{REPLICAS_LABEL, SwarmRuntime};
pub use traits::FullRuntime;
pub use types::{Endpoint, RuntimeMode};
