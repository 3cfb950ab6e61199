//! The per-provider action seam.
//!
//! The orchestrator knows nothing about fetch, sync, purge or policy runs; it
//! calls a [`ProviderAction`] once per provider with an [`ActionContext`] and
//! waits for the returned [`Diagnostics`].

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;
use crate::provider::ProviderIdentity;
use crate::update::Update;

/// Messages drained by an orchestration's fan-in task.
#[derive(Debug)]
pub(crate) enum FanIn {
    Update(usize, Update),
    Finished(usize, Diagnostics),
}

/// Handle an action uses to report progress.
///
/// Cloneable and cheap; every clone reports for the same provider. Updates
/// sent after the orchestration has returned are dropped.
#[derive(Debug, Clone)]
pub struct UpdateEmitter {
    index: usize,
    identity: ProviderIdentity,
    tx: mpsc::UnboundedSender<FanIn>,
}

impl UpdateEmitter {
    pub(crate) fn new(
        index: usize,
        identity: ProviderIdentity,
        tx: mpsc::UnboundedSender<FanIn>,
    ) -> Self {
        Self { index, identity, tx }
    }

    /// An update prefilled with this provider's identity.
    pub fn update(&self) -> Update {
        Update::new(&self.identity)
    }

    /// Send an update. Provider name and alias are always this emitter's.
    pub fn emit(&self, update: Update) {
        let update = Update {
            provider: self.identity.name.clone(),
            alias: self.identity.alias().to_string(),
            ..update
        };
        let _ = self.tx.send(FanIn::Update(self.index, update));
    }

    /// Shorthand for a progress-only update.
    pub fn progress(&self, done_count: u64, total_count: u64) {
        self.emit(self.update().progress(done_count, total_count));
    }
}

/// Everything an action gets for one provider.
#[derive(Debug, Clone)]
pub struct ActionContext {
    identity: ProviderIdentity,
    cancel: CancellationToken,
    emitter: UpdateEmitter,
}

impl ActionContext {
    pub(crate) fn new(
        identity: ProviderIdentity,
        cancel: CancellationToken,
        emitter: UpdateEmitter,
    ) -> Self {
        Self {
            identity,
            cancel,
            emitter,
        }
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the orchestration is canceled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn emitter(&self) -> &UpdateEmitter {
        &self.emitter
    }

    pub fn emit(&self, update: Update) {
        self.emitter.emit(update)
    }

    pub fn update(&self) -> Update {
        self.emitter.update()
    }
}

/// Work run against one provider.
///
/// Failures are returned as diagnostics. Implementations must return promptly
/// once [`ActionContext::cancelled`] fires, handing back whatever partial
/// diagnostics they have.
#[async_trait]
pub trait ProviderAction: Send + Sync {
    async fn execute(&self, ctx: ActionContext) -> Diagnostics;
}

#[async_trait]
impl<F, Fut> ProviderAction for F
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Diagnostics> + Send,
{
    async fn execute(&self, ctx: ActionContext) -> Diagnostics {
        self(ctx).await
    }
}
