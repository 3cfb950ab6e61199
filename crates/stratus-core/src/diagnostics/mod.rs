//! Diagnostics model and render-time processing.

pub mod classify;
pub mod diagnostic;
pub mod engine;

pub use classify::{ClassificationRule, Classifier};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity, REDACTED_PLACEHOLDER};
pub use engine::DiagnosticsEngine;
