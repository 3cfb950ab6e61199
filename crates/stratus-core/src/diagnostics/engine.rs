//! The render-time diagnostics pipeline: redact, classify, squash, sort.

use super::classify::Classifier;
use super::diagnostic::Diagnostics;

/// Prepares merged diagnostics for presentation.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsEngine {
    classifier: Classifier,
    redact: bool,
}

impl DiagnosticsEngine {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            redact: false,
        }
    }

    /// Strip sensitive regions before anything else sees the entries.
    pub fn redact(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Run the pipeline. The input is left untouched.
    pub fn process(&self, diagnostics: &Diagnostics) -> Diagnostics {
        let base = if self.redact {
            diagnostics.redacted()
        } else {
            diagnostics.clone()
        };
        self.classifier.classify(&base).squash().sorted()
    }
}
