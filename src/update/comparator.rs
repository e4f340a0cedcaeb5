// ABOUTME: Staleness comparator: is a newer image available for this container?
// ABOUTME: Applies the opt-out, opt-in, filter and watch-stopped policy before resolving.

use super::policy::{ENABLE_LABEL, UpdatePolicy};
use super::session::SkipReason;
use crate::runtime::FullRuntime;
use crate::runtime::traits::{ContainerRecord, ImageError};
use crate::types::Digest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Current,
    Stale { latest: Digest },
    Skip(SkipReason),
}

/// Policy reasons to leave a container alone, checked before any registry call.
pub fn eligibility(policy: &UpdatePolicy, record: &ContainerRecord) -> Option<SkipReason> {
    if policy.is_filtered_out(record) {
        return Some(SkipReason::Filtered);
    }
    let enabled = record.label_flag(ENABLE_LABEL);
    if enabled == Some(false) {
        return Some(SkipReason::OptedOut);
    }
    if policy.label_enable && enabled != Some(true) {
        return Some(SkipReason::NotEnabled);
    }
    if !record.is_running() && !policy.watch_stopped {
        return Some(SkipReason::NotRunning);
    }
    None
}

/// Whether the dependency cascade has to ask before recreating this container.
pub fn resists_cascade(policy: &UpdatePolicy, record: &ContainerRecord) -> bool {
    let enabled = record.label_flag(ENABLE_LABEL);
    policy.is_filtered_out(record)
        || enabled == Some(false)
        || (policy.label_enable && enabled != Some(true))
        || policy.is_monitor_only(record)
}

/// Compare a record against the digest its reference resolves to now.
///
/// A record without a local digest is stale: there is nothing to prove it current.
pub fn compare(policy: &UpdatePolicy, record: &ContainerRecord, latest: Digest) -> Staleness {
    if record.digest.as_ref() == Some(&latest) {
        Staleness::Current
    } else if policy.is_monitor_only(record) {
        Staleness::Skip(SkipReason::MonitorOnly { latest })
    } else {
        Staleness::Stale { latest }
    }
}

/// The digest `record`'s reference resolves to now, bounded by the pull
/// timeout. Pinned references never move and resolve to `None`.
pub async fn latest_digest(
    runtime: &dyn FullRuntime,
    policy: &UpdatePolicy,
    record: &ContainerRecord,
) -> Result<Option<Digest>, ImageError> {
    if record.image.is_pinned() {
        return Ok(None);
    }
    let limit = policy.timeouts.pull;
    let latest = tokio::time::timeout(limit, runtime.resolve_latest_digest(&record.image))
        .await
        .map_err(|_| {
            ImageError::PullFailed(format!("{} timed out after {:?}", record.image, limit))
        })??;
    Ok(Some(latest))
}

/// Classify one record, pulling if the runtime is configured to.
///
/// Resolution failures are the caller's per-container failure.
pub async fn classify(
    runtime: &dyn FullRuntime,
    policy: &UpdatePolicy,
    record: &ContainerRecord,
) -> Result<Staleness, ImageError> {
    if let Some(reason) = eligibility(policy, record) {
        return Ok(Staleness::Skip(reason));
    }
    let Some(latest) = latest_digest(runtime, policy, record).await? else {
        return Ok(Staleness::Current);
    };

    let staleness = compare(policy, record, latest);
    tracing::debug!(container = %record.name, image = %record.image, ?staleness, "classified");
    Ok(staleness)
}
