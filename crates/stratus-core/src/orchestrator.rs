//! Concurrent fan-out of one action across many providers.
//!
//! Each provider gets its own [`ProviderOperation`] record behind a
//! `tokio::sync::Mutex` and its own spawned action task. Updates and final
//! diagnostics flow through a per-run unbounded channel into a single fan-in
//! task, which applies them to the records and forwards normalized snapshots
//! to the [`UpdateSink`]. Cancellation is applied to the records directly, so
//! it takes effect even while the channel is backed up.
//!
//! One provider failing never stops the others.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::action::{ActionContext, FanIn, ProviderAction, UpdateEmitter};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
use crate::error::Result;
use crate::obs;
use crate::operation::{OperationStatus, ProviderOperation, ProviderSummary};
use crate::provider::ProviderIdentity;
use crate::update::{Update, UpdateSink};

type Operations = Arc<Vec<Mutex<ProviderOperation>>>;

/// Runtime knobs for an [`Orchestrator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// How long a canceled action may take to return before its task is
    /// aborted. `None` (the default) waits for the action however long it
    /// takes.
    pub cancel_grace: Option<Duration>,
}

/// Outcome of one orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub id: Uuid,
    /// Caller-supplied action label, e.g. `fetch`.
    pub action: String,
    pub status: OperationStatus,
    /// One entry per requested provider, in request order.
    pub summaries: Vec<ProviderSummary>,
    /// Every provider's diagnostics, concatenated in request order.
    pub diagnostics: Diagnostics,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OrchestrationResult {
    /// True when any merged diagnostic is an error. Drives the exit code.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    pub fn summary(&self, name: &str) -> Option<&ProviderSummary> {
        self.summaries.iter().find(|s| s.name == name)
    }

    pub fn count_by_status(&self, status: OperationStatus) -> usize {
        self.summaries.iter().filter(|s| s.status == status).count()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs a [`ProviderAction`] across providers and aggregates the outcome.
#[derive(Clone)]
pub struct Orchestrator {
    sink: Arc<dyn UpdateSink>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(sink: Arc<dyn UpdateSink>) -> Self {
        Self {
            sink,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `action` once per provider, concurrently.
    ///
    /// Returns after every provider operation is terminal and every action has
    /// returned (or been abandoned after the cancel grace period).
    pub async fn run<A>(
        &self,
        action_label: &str,
        providers: Vec<ProviderIdentity>,
        action: A,
        cancel: &CancellationToken,
    ) -> OrchestrationResult
    where
        A: ProviderAction + 'static,
    {
        let id = Uuid::new_v4();
        let span = obs::orchestration_span(&id, action_label);
        self.run_inner(id, action_label, providers, Arc::new(action), cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        id: Uuid,
        action_label: &str,
        providers: Vec<ProviderIdentity>,
        action: Arc<dyn ProviderAction>,
        cancel: &CancellationToken,
    ) -> OrchestrationResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_orchestration_started(&id, action_label, providers.len());

        let operations: Operations = Arc::new(
            providers
                .iter()
                .cloned()
                .map(|identity| Mutex::new(ProviderOperation::new(identity)))
                .collect(),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let fan_in = tokio::spawn(
            drain(
                rx,
                Arc::clone(&operations),
                Arc::clone(&self.sink),
                providers.len(),
            )
            .in_current_span(),
        );

        let units = providers
            .into_iter()
            .enumerate()
            .map(|(index, identity)| Unit {
                index,
                identity,
                operations: Arc::clone(&operations),
                action: Arc::clone(&action),
                cancel: cancel.clone(),
                tx: tx.clone(),
                grace: self.config.cancel_grace,
            })
            .map(Unit::run);
        futures::future::join_all(units).await;
        drop(tx);

        if let Err(e) = fan_in.await {
            warn!(error = %e, "fan-in task failed");
        }

        let mut summaries = Vec::with_capacity(operations.len());
        for op in operations.iter() {
            let mut op = op.lock().await;
            // Only reachable when the fan-in task died with results queued.
            if !op.is_finished() {
                let lost = Diagnostic::error(DiagnosticKind::Internal, "provider result was lost")
                    .with_resource(op.identity().key());
                op.finish(lost.into());
            }
            summaries.push(op.clone().into_summary());
        }

        let diagnostics = summaries
            .iter()
            .fold(Diagnostics::new(), |acc, s| acc.merge(s.diagnostics.clone()));
        let status = OperationStatus::rollup(summaries.iter().map(|s| s.status));

        let errors = diagnostics.count_by_severity(Severity::Error, true)
            + diagnostics.count_by_severity(Severity::Panic, true);
        let warnings = diagnostics.count_by_severity(Severity::Warning, true);
        obs::emit_orchestration_finished(
            &id,
            status,
            errors,
            warnings,
            clock.elapsed().as_millis() as u64,
        );

        OrchestrationResult {
            id,
            action: action_label.to_string(),
            status,
            summaries,
            diagnostics,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Applies queued updates and final diagnostics until every unit finished.
async fn drain(
    mut rx: mpsc::UnboundedReceiver<FanIn>,
    operations: Operations,
    sink: Arc<dyn UpdateSink>,
    expected: usize,
) {
    let mut finished = 0;
    while finished < expected {
        let Some(message) = rx.recv().await else {
            break;
        };
        match message {
            FanIn::Update(index, update) => {
                let applied = operations[index].lock().await.apply_update(&update);
                if let Some(snapshot) = applied {
                    notify(sink.as_ref(), &snapshot);
                }
            }
            FanIn::Finished(index, diagnostics) => {
                operations[index].lock().await.finish(diagnostics);
                finished += 1;
            }
        }
    }
}

/// Forward an update to the sink. A panicking sink loses that update only.
fn notify(sink: &dyn UpdateSink, update: &Update) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink.on_update(update))) {
        warn!(
            provider = %update.provider,
            panic = %panic_message(payload.as_ref()),
            "update sink panicked; update dropped"
        );
    }
}

/// One provider's supervisor: starts the action, watches for cancellation and
/// turns whatever the action task yields into diagnostics.
struct Unit {
    index: usize,
    identity: ProviderIdentity,
    operations: Operations,
    action: Arc<dyn ProviderAction>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<FanIn>,
    grace: Option<Duration>,
}

impl Unit {
    async fn run(self) {
        let diagnostics = self.execute().await;
        // With the fan-in task gone, settle the record here instead.
        if let Err(SendError(FanIn::Finished(_, diagnostics))) =
            self.tx.send(FanIn::Finished(self.index, diagnostics))
        {
            self.operations[self.index].lock().await.finish(diagnostics);
        }
    }

    async fn execute(&self) -> Diagnostics {
        let started = {
            let mut op = self.operations[self.index].lock().await;
            if op.is_terminal() {
                false
            } else if self.cancel.is_cancelled() {
                op.cancel();
                false
            } else {
                op.start()
            }
        };
        if !started {
            return Diagnostics::new();
        }

        let ctx = ActionContext::new(
            self.identity.clone(),
            self.cancel.clone(),
            UpdateEmitter::new(self.index, self.identity.clone(), self.tx.clone()),
        );
        let action = Arc::clone(&self.action);
        let mut handle =
            tokio::spawn(async move { action.execute(ctx).await }.in_current_span());

        let joined = tokio::select! {
            biased;
            joined = &mut handle => Some(joined),
            _ = self.cancel.cancelled() => None,
        };

        // A still-running operation is canceled as soon as the signal is seen,
        // even if its action returned in the meantime. Terminal ones keep
        // their status.
        if self.cancel.is_cancelled() {
            self.operations[self.index].lock().await.cancel();
        }
        if let Some(joined) = joined {
            return self.collect(joined);
        }

        let Some(grace) = self.grace else {
            return self.collect(handle.await);
        };
        let waited = tokio::time::timeout(grace, &mut handle).await;
        match waited {
            Ok(joined) => self.collect(joined),
            Err(_) => {
                handle.abort();
                obs::emit_action_abandoned(&self.identity.key(), grace.as_millis() as u64);
                Diagnostic::warning(
                    DiagnosticKind::Internal,
                    "provider action did not stop after cancellation",
                )
                .with_resource(self.identity.key())
                .into()
            }
        }
    }

    /// A panicking action still terminates into diagnostics.
    fn collect(&self, joined: std::result::Result<Diagnostics, JoinError>) -> Diagnostics {
        match joined {
            Ok(diagnostics) => diagnostics,
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic().as_ref());
                warn!(provider = %self.identity.key(), panic = %message, "provider action panicked");
                Diagnostic::new(
                    Severity::Panic,
                    DiagnosticKind::Internal,
                    "provider action panicked",
                )
                .with_detail(message)
                .with_resource(self.identity.key())
                .into()
            }
            Err(err) => Diagnostic::error(DiagnosticKind::Internal, "provider action was aborted")
                .with_detail(err.to_string())
                .with_resource(self.identity.key())
                .into(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
