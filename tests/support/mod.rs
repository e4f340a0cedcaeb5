// ABOUTME: Test support utilities.
// ABOUTME: Tracing setup plus in-memory runtime fixtures shared by integration tests.

use lookout::runtime::MemoryRuntime;
use lookout::runtime::memory::ContainerFixture;
use lookout::update::{Coordinator, ScanLock, Timeouts, UpdatePolicy};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("lookout=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A full sha256 digest made of one repeated hex character.
#[allow(dead_code)]
pub fn digest(fill: char) -> String {
    format!("sha256:{}", fill.to_string().repeat(64))
}

/// Policy with timeouts short enough for tests.
#[allow(dead_code)]
pub fn fast_policy() -> UpdatePolicy {
    UpdatePolicy {
        timeouts: Timeouts {
            stop_grace: Duration::from_millis(50),
            operation: Duration::from_secs(5),
            pull: Duration::from_secs(5),
            settle: Duration::ZERO,
        },
        ..UpdatePolicy::default()
    }
}

/// Seed `runtime` with containers running `image` at digest `a`.
#[allow(dead_code)]
pub fn seed(runtime: &MemoryRuntime, image: &str, fixtures: Vec<ContainerFixture>) {
    runtime.publish(image, &digest('a'));
    for fixture in fixtures {
        runtime.add(fixture).unwrap();
    }
}

#[allow(dead_code)]
pub fn coordinator(runtime: &Arc<MemoryRuntime>, policy: UpdatePolicy) -> Coordinator {
    Coordinator::new(
        "local",
        runtime.clone(),
        policy,
        ScanLock::new(),
        CancellationToken::new(),
    )
}
