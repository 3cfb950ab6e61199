//! Progress snapshots and the sinks that receive them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagnostics::Severity;
use crate::provider::ProviderIdentity;

/// Immutable progress snapshot from one running provider operation.
///
/// Actions emit raw updates; the owning operation normalizes them (counters
/// never go backwards) before a sink sees them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub provider: String,
    pub alias: String,
    pub done_count: u64,
    pub total_count: u64,
    /// Diagnostics reported so far.
    pub diagnostic_count: u64,
    /// Worst severity reported so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_severity: Option<Severity>,
    pub all_done: bool,
}

impl Update {
    /// An empty update for `identity`, carrying its planned total.
    pub fn new(identity: &ProviderIdentity) -> Self {
        Self {
            provider: identity.name.clone(),
            alias: identity.alias().to_string(),
            done_count: 0,
            total_count: identity.total_count,
            diagnostic_count: 0,
            max_severity: None,
            all_done: false,
        }
    }

    pub fn progress(mut self, done_count: u64, total_count: u64) -> Self {
        self.done_count = done_count;
        self.total_count = total_count;
        self
    }

    pub fn diagnostics(mut self, count: u64, max_severity: Option<Severity>) -> Self {
        self.diagnostic_count = count;
        self.max_severity = max_severity;
        self
    }

    /// Mark this as the final update of the stream.
    pub fn done(mut self) -> Self {
        self.all_done = true;
        self
    }

    pub fn has_errors(&self) -> bool {
        self.max_severity.is_some_and(Severity::is_error)
    }
}

/// Receives every applied, normalized update of an orchestration.
///
/// Called from the orchestration's fan-in task, so implementations must not
/// block. Calls may continue to arrive for providers that are already
/// terminal elsewhere in the process (e.g. the renderer) and must be tolerated.
pub trait UpdateSink: Send + Sync {
    fn on_update(&self, update: &Update);
}

impl<F> UpdateSink for F
where
    F: Fn(&Update) + Send + Sync,
{
    fn on_update(&self, update: &Update) {
        self(update)
    }
}

/// Discards updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl UpdateSink for NoopSink {
    fn on_update(&self, _update: &Update) {}
}

/// Logs each update as a `provider.update` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl UpdateSink for TracingSink {
    fn on_update(&self, update: &Update) {
        debug!(
            event = "provider.update",
            provider = %update.provider,
            alias = %update.alias,
            done = update.done_count,
            total = update.total_count,
            diagnostics = update.diagnostic_count,
            all_done = update.all_done,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_update_new_uses_identity() {
        let id = ProviderIdentity::new("aws").with_alias("prod").with_total(12);
        let update = Update::new(&id);
        assert_eq!(update.provider, "aws");
        assert_eq!(update.alias, "prod");
        assert_eq!(update.total_count, 12);
        assert!(!update.all_done);
    }

    #[test]
    fn test_update_builders() {
        let update = Update::new(&ProviderIdentity::new("gcp"))
            .progress(3, 10)
            .diagnostics(2, Some(Severity::Error))
            .done();
        assert_eq!(update.done_count, 3);
        assert_eq!(update.diagnostic_count, 2);
        assert!(update.has_errors());
        assert!(update.all_done);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |u: &Update| seen.lock().unwrap().push(u.provider.clone());
        sink.on_update(&Update::new(&ProviderIdentity::new("a")));
        sink.on_update(&Update::new(&ProviderIdentity::new("b")));
        assert_eq!(*seen.lock().unwrap(), ["a", "b"]);
    }

    #[test]
    fn test_update_serde_skips_missing_severity() {
        let json = serde_json::to_value(Update::new(&ProviderIdentity::new("a"))).unwrap();
        assert!(json.get("max_severity").is_none());
    }
}
