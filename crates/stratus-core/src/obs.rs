//! Structured observability hooks for orchestration lifecycle events.
//!
//! This module provides:
//! - an orchestration-scoped span via [`orchestration_span`]
//! - emitters for start, operation transitions, ignored updates and finish
//!
//! Filter with `RUST_LOG`, e.g. `RUST_LOG=stratus_core=debug`.

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::operation::OperationStatus;

/// Span tagging every event emitted while an orchestration runs.
///
/// Attach it with `tracing::Instrument` so it survives `.await` points.
pub fn orchestration_span(orchestration_id: &Uuid, action: &str) -> tracing::Span {
    tracing::info_span!("stratus.orchestration", orchestration_id = %orchestration_id, action = %action)
}

/// Emit event: orchestration started.
///
/// ```ignore
/// emit_orchestration_started(&id, "fetch", 3);
/// // logs: event=orchestration.started orchestration_id=... action=fetch providers=3
/// ```
pub fn emit_orchestration_started(orchestration_id: &Uuid, action: &str, providers: usize) {
    info!(
        event = "orchestration.started",
        orchestration_id = %orchestration_id,
        action = %action,
        providers = providers,
    );
}

/// Emit event: a provider operation changed status.
///
/// Terminal transitions log at info, the rest at debug.
pub fn emit_operation_transition(provider: &str, from: OperationStatus, to: OperationStatus) {
    if to.is_terminal() {
        info!(event = "operation.transition", provider = %provider, from = %from, to = %to);
    } else {
        debug!(event = "operation.transition", provider = %provider, from = %from, to = %to);
    }
}

/// Emit event: an update arrived for an operation that was not running.
pub fn emit_update_ignored(provider: &str, status: OperationStatus) {
    trace!(event = "update.ignored", provider = %provider, status = %status);
}

/// Emit event: orchestration finished.
pub fn emit_orchestration_finished(
    orchestration_id: &Uuid,
    status: OperationStatus,
    errors: u64,
    warnings: u64,
    duration_ms: u64,
) {
    info!(
        event = "orchestration.finished",
        orchestration_id = %orchestration_id,
        status = %status,
        errors = errors,
        warnings = warnings,
        duration_ms = duration_ms,
    );
}

/// Emit event: an action outlived the cancel grace period and was aborted.
pub fn emit_action_abandoned(provider: &str, grace_ms: u64) {
    tracing::warn!(event = "action.abandoned", provider = %provider, grace_ms = grace_ms);
}
