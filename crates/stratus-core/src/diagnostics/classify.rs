//! Pattern-based classification of raw, error-derived diagnostics.
//!
//! A [`Classifier`] holds an ordered list of [`ClassificationRule`]s. Each
//! diagnostic is matched once against the rules; the first match rewrites its
//! kind, severity and summary as the rule specifies. Unmatched diagnostics pass
//! through unchanged, and entries are never dropped or reordered.

use regex::Regex;

use super::diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
use crate::error::{Result, StratusError};

/// One classification rule. Unset fields leave the diagnostic's value as is.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pattern: Regex,
    kind: Option<DiagnosticKind>,
    severity: Option<Severity>,
    summary: Option<String>,
}

impl ClassificationRule {
    /// Compile a rule matching `pattern`.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| StratusError::InvalidRule {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern,
            kind: None,
            severity: None,
            summary: None,
        })
    }

    pub fn kind(mut self, kind: DiagnosticKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Rules look at the detail; a diagnostic without one is matched on its
    /// summary instead.
    pub fn matches(&self, diagnostic: &Diagnostic) -> bool {
        let text = if diagnostic.detail().is_empty() {
            diagnostic.summary()
        } else {
            diagnostic.detail()
        };
        self.pattern.is_match(text)
    }

    fn apply(&self, diagnostic: &Diagnostic) -> Diagnostic {
        diagnostic.reclassified(
            self.kind.unwrap_or(diagnostic.kind()),
            self.severity.unwrap_or(diagnostic.severity()),
            self.summary
                .clone()
                .unwrap_or_else(|| diagnostic.summary().to_string()),
        )
    }
}

/// Built-in rules for common provider failures: (pattern, kind, severity, summary).
const BUILTIN_RULES: &[(&str, DiagnosticKind, Option<Severity>, &str)] = &[
    (
        r"(?i)connection refused",
        DiagnosticKind::Database,
        None,
        "failed to connect to the database",
    ),
    (
        r"(?i)no such host|i/o timeout|deadline exceeded|network is unreachable",
        DiagnosticKind::Network,
        None,
        "network error while calling the provider API",
    ),
    (
        r"(?i)throttl|rate exceeded|too many requests",
        DiagnosticKind::Network,
        Some(Severity::Warning),
        "provider API rate limit reached",
    ),
    (
        r"(?i)access ?denied|unauthori[sz]ed|invalid credentials|expired ?token",
        DiagnosticKind::User,
        None,
        "provider credentials were rejected",
    ),
    (
        r"(?i)plugin (exited|crashed)|unexpected eof",
        DiagnosticKind::Plugin,
        None,
        "provider plugin terminated unexpectedly",
    ),
];

/// Ordered rule set. First match wins.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassificationRule>,
}

impl Classifier {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// A classifier that matches nothing.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Classify a single diagnostic.
    pub fn classify_one(&self, diagnostic: &Diagnostic) -> Diagnostic {
        match self.rules.iter().find(|rule| rule.matches(diagnostic)) {
            Some(rule) => rule.apply(diagnostic),
            None => diagnostic.clone(),
        }
    }

    /// Classify every entry, preserving length and order.
    pub fn classify(&self, diagnostics: &Diagnostics) -> Diagnostics {
        diagnostics.iter().map(|d| self.classify_one(d)).collect()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(pattern, kind, severity, summary)| {
                let rule = ClassificationRule::new(pattern).ok()?.kind(*kind).summary(*summary);
                Some(match severity {
                    Some(severity) => rule.severity(*severity),
                    None => rule,
                })
            })
            .collect();
        Self { rules }
    }
}
