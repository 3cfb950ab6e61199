//! Per-provider operation state machine.
//!
//! `Pending -> Running -> {Completed, Warned, Failed, Canceled}`. An operation
//! with no planned work is `Completed` from the start. Once terminal, updates
//! are ignored; only [`ProviderOperation::finish`] may still merge the
//! action's returned diagnostics (once) and escalate a success status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, Severity};
use crate::obs;
use crate::provider::ProviderIdentity;
use crate::update::Update;

/// Status of a single provider operation, and of an orchestration overall.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Warned,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationStatus::Pending | OperationStatus::Running)
    }

    /// Rank used when rolling many statuses into one.
    ///
    /// Failed > Canceled > Warned > Completed > Running > Pending.
    pub fn precedence(self) -> u8 {
        match self {
            OperationStatus::Pending => 0,
            OperationStatus::Running => 1,
            OperationStatus::Completed => 2,
            OperationStatus::Warned => 3,
            OperationStatus::Canceled => 4,
            OperationStatus::Failed => 5,
        }
    }

    /// Terminal status implied by the worst severity seen.
    pub fn from_severity(max_severity: Option<Severity>) -> Self {
        match max_severity {
            Some(s) if s.is_error() => OperationStatus::Failed,
            Some(Severity::Warning) => OperationStatus::Warned,
            _ => OperationStatus::Completed,
        }
    }

    /// Highest-precedence status of `statuses`; `Completed` when empty.
    pub fn rollup(statuses: impl IntoIterator<Item = OperationStatus>) -> Self {
        statuses
            .into_iter()
            .max_by_key(|s| s.precedence())
            .unwrap_or(OperationStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Warned => "warned",
            OperationStatus::Failed => "failed",
            OperationStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final, read-only view of one provider's run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderSummary {
    pub name: String,
    pub alias: String,
    pub status: OperationStatus,
    pub done_count: u64,
    pub total_count: u64,
    pub diagnostics: Diagnostics,
}

impl ProviderSummary {
    /// `name`, or `name(alias)` when the alias differs.
    pub fn key(&self) -> String {
        if self.alias == self.name {
            self.name.clone()
        } else {
            format!("{}({})", self.name, self.alias)
        }
    }
}

/// One provider's run.
#[derive(Debug, Clone)]
pub struct ProviderOperation {
    identity: ProviderIdentity,
    status: OperationStatus,
    diagnostics: Diagnostics,
    done_count: u64,
    total_count: u64,
    diagnostic_count: u64,
    max_severity: Option<Severity>,
    finished: bool,
}

impl ProviderOperation {
    /// Schedule an operation. No planned work means `Completed` right away.
    pub fn new(identity: ProviderIdentity) -> Self {
        let total_count = identity.total_count;
        let mut op = Self {
            identity,
            status: OperationStatus::Pending,
            diagnostics: Diagnostics::new(),
            done_count: 0,
            total_count,
            diagnostic_count: 0,
            max_severity: None,
            finished: false,
        };
        if total_count == 0 {
            op.transition(OperationStatus::Completed);
        }
        op
    }

    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn done_count(&self) -> u64 {
        self.done_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// True once [`finish`](Self::finish) has merged the final diagnostics.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn transition(&mut self, to: OperationStatus) {
        if self.status != to {
            obs::emit_operation_transition(&self.identity.key(), self.status, to);
            self.status = to;
        }
    }

    /// `Pending -> Running`. Returns false if the operation was not pending.
    pub fn start(&mut self) -> bool {
        if self.status != OperationStatus::Pending {
            return false;
        }
        self.transition(OperationStatus::Running);
        true
    }

    /// Apply a raw update from the action.
    ///
    /// Returns the normalized snapshot to forward to sinks, or `None` when the
    /// operation is not running and the update was dropped.
    pub fn apply_update(&mut self, update: &Update) -> Option<Update> {
        if self.status != OperationStatus::Running {
            obs::emit_update_ignored(&self.identity.key(), self.status);
            return None;
        }

        self.done_count = self.done_count.max(update.done_count);
        self.total_count = self.total_count.max(update.total_count);
        self.diagnostic_count = self.diagnostic_count.max(update.diagnostic_count);
        self.max_severity = self.max_severity.max(update.max_severity);

        let snapshot = Update {
            all_done: update.all_done,
            ..self.snapshot()
        };
        if update.all_done {
            self.transition(OperationStatus::from_severity(self.max_severity));
        }
        Some(snapshot)
    }

    /// Mark the operation canceled if it has not reached a terminal status.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.transition(OperationStatus::Canceled);
        true
    }

    /// Merge the action's returned diagnostics and settle the final status.
    ///
    /// Only the first call merges. A running operation derives its status
    /// from everything seen; a Completed/Warned one can only escalate; Failed
    /// and Canceled are final.
    pub fn finish(&mut self, diagnostics: Diagnostics) -> OperationStatus {
        if self.finished {
            return self.status;
        }
        self.finished = true;

        self.max_severity = self.max_severity.max(diagnostics.max_severity());
        self.diagnostic_count = self.diagnostic_count.max(diagnostics.len() as u64);
        self.diagnostics = std::mem::take(&mut self.diagnostics).merge(diagnostics);

        let derived = OperationStatus::from_severity(self.max_severity);
        match self.status {
            OperationStatus::Pending | OperationStatus::Running => self.transition(derived),
            OperationStatus::Completed | OperationStatus::Warned
                if derived.precedence() > self.status.precedence() =>
            {
                self.transition(derived)
            }
            _ => {}
        }
        self.status
    }

    /// Current counters as an update.
    pub fn snapshot(&self) -> Update {
        Update {
            provider: self.identity.name.clone(),
            alias: self.identity.alias().to_string(),
            done_count: self.done_count,
            total_count: self.total_count,
            diagnostic_count: self.diagnostic_count,
            max_severity: self.max_severity,
            all_done: self.is_terminal(),
        }
    }

    pub fn into_summary(self) -> ProviderSummary {
        ProviderSummary {
            alias: self.identity.alias().to_string(),
            name: self.identity.name,
            status: self.status,
            done_count: self.done_count,
            total_count: self.total_count,
            diagnostics: self.diagnostics,
        }
    }
}
