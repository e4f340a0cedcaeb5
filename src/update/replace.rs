// ABOUTME: Container replacement state machine.
// ABOUTME: Each transition consumes the replacement and hands it back with the error on failure.

use std::future::Future;
use std::time::Duration;

use super::error::{ReplaceError, Step};
use super::plan::{PlanReason, PlannedContainer};
use super::policy::Timeouts;
use super::session::{ContainerOutcome, ReplaceState};
use crate::runtime::FullRuntime;
use crate::runtime::traits::{ContainerError, ContainerSpec};
use crate::types::{ContainerId, ContainerName, Digest, ImageId, ImageRef};

/// Result type for transitions that may need rollback on failure.
pub type TransitionResult<T, S> = Result<Replacement<T>, (Replacement<S>, ReplaceError)>;

/// What every transition needs from the session.
#[derive(Clone, Copy)]
pub struct ReplaceContext<'a> {
    pub runtime: &'a dyn FullRuntime,
    pub timeouts: &'a Timeouts,
    /// Remove the old image once the replacement is verified.
    pub cleanup: bool,
}

// =============================================================================
// States
// =============================================================================

/// Configuration captured; nothing touched yet.
#[derive(Debug)]
pub struct Pending;

/// Old container stopped under its own name.
#[derive(Debug)]
pub struct Stopped;

/// Old container stopped and renamed out of the way.
#[derive(Debug)]
pub struct Parked {
    parked_as: ContainerName,
}

/// Replacement created, not yet started.
#[derive(Debug)]
pub struct Created {
    parked_as: ContainerName,
    new_id: ContainerId,
}

#[derive(Debug)]
pub struct Started {
    parked_as: ContainerName,
    new_id: ContainerId,
}

/// Replacement passed its liveness check.
#[derive(Debug)]
pub struct Verified {
    parked_as: ContainerName,
    new_id: ContainerId,
}

#[derive(Debug)]
pub struct Completed {
    new_id: ContainerId,
}

/// Old container back in service. `restored_as` is its parked name when
/// the original name could not be reclaimed.
#[derive(Debug)]
pub struct RolledBack {
    restored_as: ContainerName,
}

/// One container on its way to a new image.
#[derive(Debug)]
pub struct Replacement<S> {
    name: ContainerName,
    image: ImageRef,
    /// Changes when a runtime re-creates on rename.
    old_id: ContainerId,
    old_image: ImageId,
    old_digest: Option<Digest>,
    /// Stopped containers are replaced without being started.
    was_running: bool,
    spec: ContainerSpec,
    reason: PlanReason,
    state: S,
}

async fn bounded<T, F>(
    limit: Duration,
    container: &ContainerName,
    step: Step,
    call: F,
) -> Result<T, ReplaceError>
where
    F: Future<Output = Result<T, ContainerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ReplaceError::Runtime {
            container: container.clone(),
            step,
            source,
        }),
        Err(_) => Err(ReplaceError::Timeout {
            container: container.clone(),
            step,
            timeout: limit,
        }),
    }
}

impl<S> Replacement<S> {
    fn advance<T>(self, next: impl FnOnce(S) -> T) -> Replacement<T> {
        Replacement {
            name: self.name,
            image: self.image,
            old_id: self.old_id,
            old_image: self.old_image,
            old_digest: self.old_digest,
            was_running: self.was_running,
            spec: self.spec,
            reason: self.reason,
            state: next(self.state),
        }
    }

    fn transition<T>(self, state: T) -> Replacement<T> {
        self.advance(|_| state)
    }

    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn reason(&self) -> &PlanReason {
        &self.reason
    }

    pub fn was_running(&self) -> bool {
        self.was_running
    }

    /// Start the old container again if it was running before.
    async fn resume(
        self,
        ctx: ReplaceContext<'_>,
        old_id: ContainerId,
        restored_as: ContainerName,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        if self.was_running {
            bounded(
                ctx.timeouts.operation,
                &restored_as,
                Step::Start,
                ctx.runtime.start_container(&old_id),
            )
            .await?;
        }
        tracing::info!(
            container = %self.name,
            running_as = %restored_as,
            "restored previous container"
        );
        let mut rolled_back = self.transition(RolledBack { restored_as });
        rolled_back.old_id = old_id;
        Ok(rolled_back)
    }

    /// Bring the parked old container back under its name and resume it.
    ///
    /// If the name cannot be reclaimed the old container is started under
    /// its parked name instead.
    async fn unpark(
        self,
        ctx: ReplaceContext<'_>,
        parked_as: &ContainerName,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let renamed = bounded(
            ctx.timeouts.operation,
            parked_as,
            Step::Rename,
            ctx.runtime.rename_container(&self.old_id, &self.name),
        )
        .await;
        match renamed {
            Ok(old_id) => {
                let name = self.name.clone();
                self.resume(ctx, old_id, name).await
            }
            Err(error) => {
                tracing::warn!(
                    container = %self.name,
                    parked = %parked_as,
                    %error,
                    "cannot reclaim name, restoring under parked name"
                );
                let old_id = self.old_id.clone();
                self.resume(ctx, old_id, parked_as.clone()).await
            }
        }
    }

    /// Force-remove a half-made replacement, then unpark the old container.
    /// A replacement that cannot be removed is left behind.
    async fn discard(
        self,
        ctx: ReplaceContext<'_>,
        parked_as: ContainerName,
        new_id: ContainerId,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let removed = bounded(
            ctx.timeouts.operation,
            &self.name,
            Step::Remove,
            ctx.runtime.remove_container(&new_id, true),
        )
        .await;
        if let Err(error) = removed {
            tracing::warn!(
                container = %self.name,
                id = %new_id.short(),
                %error,
                "replacement left behind"
            );
        }
        self.unpark(ctx, &parked_as).await
    }
}

// =============================================================================
// Pending -> Stopped
// =============================================================================

impl Replacement<Pending> {
    /// Capture the configuration the replacement will be created from.
    ///
    /// # Errors
    ///
    /// Returns `ReplaceError` if the container cannot be inspected. Nothing
    /// has been changed at that point.
    pub async fn prepare(
        ctx: ReplaceContext<'_>,
        planned: &PlannedContainer,
    ) -> Result<Self, ReplaceError> {
        let record = &planned.record;
        let spec = bounded(
            ctx.timeouts.operation,
            &record.name,
            Step::Inspect,
            ctx.runtime.inspect_spec(&record.id),
        )
        .await?;
        Ok(Replacement {
            name: record.name.clone(),
            image: record.image.clone(),
            old_id: record.id.clone(),
            old_image: record.image_id.clone(),
            old_digest: record.digest.clone(),
            was_running: record.is_running(),
            spec,
            reason: planned.reason.clone(),
            state: Pending,
        })
    }

    /// Stop the old container. The runtime kills it when the grace period runs out.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)`; a failed stop is terminal for this container.
    #[must_use = "replacement state must be used"]
    pub async fn stop(self, ctx: ReplaceContext<'_>) -> TransitionResult<Stopped, Pending> {
        let grace = ctx.timeouts.stop_grace;
        let stopped = bounded(
            grace + ctx.timeouts.operation,
            &self.name,
            Step::Stop,
            ctx.runtime.stop_container(&self.old_id, grace),
        )
        .await;
        match stopped {
            Ok(()) => {
                tracing::debug!(container = %self.name, "stopped");
                Ok(self.transition(Stopped))
            }
            Err(e) => Err((self, e)),
        }
    }
}

// =============================================================================
// Stopped -> Parked
// =============================================================================

impl Replacement<Stopped> {
    /// Rename the old container so the replacement can take its name.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` to allow `restore`.
    #[must_use = "replacement state must be used"]
    pub async fn park(self, ctx: ReplaceContext<'_>) -> TransitionResult<Parked, Stopped> {
        let parked_as = self.name.parked(&self.old_id);
        let renamed = bounded(
            ctx.timeouts.operation,
            &self.name,
            Step::Rename,
            ctx.runtime.rename_container(&self.old_id, &parked_as),
        )
        .await;
        match renamed {
            Ok(old_id) => {
                tracing::debug!(container = %self.name, parked = %parked_as, "parked");
                let mut parked = self.transition(Parked { parked_as });
                parked.old_id = old_id;
                Ok(parked)
            }
            Err(e) => Err((self, e)),
        }
    }

    /// Start the old container again if it was running.
    pub async fn restore(
        self,
        ctx: ReplaceContext<'_>,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let old_id = self.old_id.clone();
        let name = self.name.clone();
        self.resume(ctx, old_id, name).await
    }
}

// =============================================================================
// Parked -> Created
// =============================================================================

impl Replacement<Parked> {
    /// Create the replacement from the captured configuration.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` to allow `restore`.
    #[must_use = "replacement state must be used"]
    pub async fn create(self, ctx: ReplaceContext<'_>) -> TransitionResult<Created, Parked> {
        let created = bounded(
            ctx.timeouts.operation,
            &self.name,
            Step::Create,
            ctx.runtime.create_container(&self.spec),
        )
        .await;
        match created {
            Ok(new_id) => {
                tracing::debug!(
                    container = %self.name,
                    id = %new_id.short(),
                    "created replacement"
                );
                Ok(self.advance(|Parked { parked_as }| Created { parked_as, new_id }))
            }
            Err(e) => Err((self, e)),
        }
    }

    pub async fn restore(
        self,
        ctx: ReplaceContext<'_>,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let parked_as = self.state.parked_as.clone();
        self.unpark(ctx, &parked_as).await
    }
}

// =============================================================================
// Created -> Started
// =============================================================================

impl Replacement<Created> {
    /// # Errors
    ///
    /// Returns `(self, error)` to allow `rollback`.
    #[must_use = "replacement state must be used"]
    pub async fn start(self, ctx: ReplaceContext<'_>) -> TransitionResult<Started, Created> {
        let started = bounded(
            ctx.timeouts.operation,
            &self.name,
            Step::Start,
            ctx.runtime.start_container(&self.state.new_id),
        )
        .await;
        match started {
            Ok(()) => {
                Ok(self.advance(|Created { parked_as, new_id }| Started { parked_as, new_id }))
            }
            Err(e) => Err((self, e)),
        }
    }

    /// Accept a replacement for a container that was not running. It is left
    /// created but not started, so no liveness check applies.
    pub fn keep_stopped(self) -> Replacement<Verified> {
        tracing::debug!(container = %self.name, "previous container was stopped, not started");
        self.advance(|Created { parked_as, new_id }| Verified { parked_as, new_id })
    }

    pub async fn rollback(
        self,
        ctx: ReplaceContext<'_>,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let parked_as = self.state.parked_as.clone();
        let new_id = self.state.new_id.clone();
        self.discard(ctx, parked_as, new_id).await
    }
}

// =============================================================================
// Started -> Verified
// =============================================================================

impl Replacement<Started> {
    /// Wait out the settle window, then require the replacement to be live.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` when the replacement exited, reports unhealthy,
    /// or cannot be inspected.
    #[must_use = "replacement state must be used"]
    pub async fn verify(self, ctx: ReplaceContext<'_>) -> TransitionResult<Verified, Started> {
        tokio::time::sleep(ctx.timeouts.settle).await;
        let status = bounded(
            ctx.timeouts.operation,
            &self.name,
            Step::Verify,
            ctx.runtime.container_status(&self.state.new_id),
        )
        .await;
        match status {
            Ok(status) if status.is_live() => {
                Ok(self.advance(|Started { parked_as, new_id }| Verified { parked_as, new_id }))
            }
            Ok(status) => {
                let error = ReplaceError::NotLive {
                    container: self.name.clone(),
                    status,
                };
                Err((self, error))
            }
            Err(e) => Err((self, e)),
        }
    }

    pub async fn rollback(
        self,
        ctx: ReplaceContext<'_>,
    ) -> Result<Replacement<RolledBack>, ReplaceError> {
        let parked_as = self.state.parked_as.clone();
        let new_id = self.state.new_id.clone();
        self.discard(ctx, parked_as, new_id).await
    }
}

// =============================================================================
// Verified -> Completed
// =============================================================================

impl Replacement<Verified> {
    /// Remove the parked old container and, with cleanup on, its image.
    ///
    /// The replacement is live at this point, so failures here are logged
    /// and do not undo it.
    pub async fn finish(self, ctx: ReplaceContext<'_>) -> Replacement<Completed> {
        let limit = ctx.timeouts.operation;
        let removed = bounded(
            limit,
            &self.state.parked_as,
            Step::Remove,
            ctx.runtime.remove_container(&self.old_id, true),
        )
        .await;
        if let Err(error) = removed {
            tracing::warn!(container = %self.name, %error, "old container left behind");
        }

        if ctx.cleanup && self.reason.latest().is_some() {
            let cleaned = tokio::time::timeout(
                limit,
                ctx.runtime.remove_image(&self.old_image, false),
            )
            .await;
            let image = self.old_image.short();
            match cleaned {
                Ok(Ok(())) => tracing::debug!(%image, "removed old image"),
                Ok(Err(error)) => tracing::warn!(%image, %error, "old image not removed"),
                Err(_) => tracing::warn!(%image, "old image removal timed out"),
            }
        }

        tracing::info!(container = %self.name, image = %self.image, "updated");
        self.advance(|Verified { new_id, .. }| Completed { new_id })
    }
}

impl Replacement<Completed> {
    pub fn new_container(&self) -> &ContainerId {
        &self.state.new_id
    }

    pub fn outcome(&self) -> ContainerOutcome {
        ContainerOutcome::Updated {
            from: self.old_digest.clone(),
            to: self.reason.latest().cloned(),
            forced: !matches!(self.reason, PlanReason::Stale { .. }),
        }
    }
}

/// Outcome of a failed step once the rollback has been attempted.
pub fn rolled_back_outcome(
    container: &ContainerName,
    error: ReplaceError,
    state: ReplaceState,
    rollback: Result<Replacement<RolledBack>, ReplaceError>,
) -> ContainerOutcome {
    match rollback {
        Ok(rolled_back) => {
            tracing::warn!(%container, %error, "replacement rolled back");
            let restored_as = &rolled_back.state.restored_as;
            let error = if restored_as == container {
                error.to_string()
            } else {
                format!("{error}; previous container restored as {restored_as}")
            };
            ContainerOutcome::Failed {
                error,
                state: Some(state),
                rolled_back: true,
            }
        }
        Err(rollback) => {
            let error = ReplaceError::RollbackFailed {
                cause: Box::new(error),
                rollback: Box::new(rollback),
            };
            tracing::error!(%container, %error, "container left stopped");
            ContainerOutcome::Failed {
                error: error.to_string(),
                state: Some(ReplaceState::FailedTerminal),
                rolled_back: false,
            }
        }
    }
}

/// Drive a parked container through create, start, verify and cleanup,
/// rolling back on the first failure. A container that was stopped is only
/// created.
pub async fn complete(ctx: ReplaceContext<'_>, parked: Replacement<Parked>) -> ContainerOutcome {
    let name = parked.name.clone();
    let created = match parked.create(ctx).await {
        Ok(created) => created,
        Err((parked, error)) => {
            let rollback = parked.restore(ctx).await;
            return rolled_back_outcome(&name, error, ReplaceState::Creating, rollback);
        }
    };
    if !created.was_running() {
        return created.keep_stopped().finish(ctx).await.outcome();
    }
    let started = match created.start(ctx).await {
        Ok(started) => started,
        Err((created, error)) => {
            let rollback = created.rollback(ctx).await;
            return rolled_back_outcome(&name, error, ReplaceState::Starting, rollback);
        }
    };
    let verified = match started.verify(ctx).await {
        Ok(verified) => verified,
        Err((started, error)) => {
            let rollback = started.rollback(ctx).await;
            return rolled_back_outcome(&name, error, ReplaceState::Verifying, rollback);
        }
    };
    verified.finish(ctx).await.outcome()
}
