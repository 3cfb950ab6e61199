//! Stratus Core Library
//!
//! Runs one action (fetch, sync, purge, policy run) concurrently across many
//! cloud providers, tracks each provider's operation through its state
//! machine, and folds every provider's diagnostics into one
//! [`OrchestrationResult`].

pub mod action;
pub mod diagnostics;
pub mod error;
pub mod obs;
pub mod operation;
pub mod orchestrator;
pub mod provider;
pub mod telemetry;
pub mod update;

pub use action::{ActionContext, ProviderAction, UpdateEmitter};
pub use diagnostics::{
    ClassificationRule, Classifier, Diagnostic, DiagnosticKind, Diagnostics, DiagnosticsEngine,
    Severity, REDACTED_PLACEHOLDER,
};
pub use error::{Result, StratusError};
pub use operation::{OperationStatus, ProviderOperation, ProviderSummary};
pub use orchestrator::{OrchestrationResult, Orchestrator, OrchestratorConfig};
pub use provider::ProviderIdentity;
pub use telemetry::init_tracing;
pub use update::{NoopSink, TracingSink, Update, UpdateSink};

pub use tokio_util::sync::CancellationToken;

/// Stratus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
