//! Structured diagnostics produced by provider operations.
//!
//! A [`Diagnostic`] is one issue (severity, kind, summary, detail, optional
//! resource). A [`Diagnostics`] value is an ordered collection of them. Every
//! transformation on [`Diagnostics`] (redaction, classification, squashing,
//! sorting) returns a new value and leaves the receiver untouched, so a
//! collection can be shared between the orchestrator and renderers freely.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder written over every region flagged as sensitive.
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Severity level for a diagnostic.
///
/// Variants are declared in ascending order, so the derived `Ord` is the one
/// and only severity ordering: `Ignore < Warning < Error < Panic`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ignore,
    Warning,
    Error,
    Panic,
}

impl Severity {
    /// All severities, most severe first.
    pub const DESCENDING: [Severity; 4] = [
        Severity::Panic,
        Severity::Error,
        Severity::Warning,
        Severity::Ignore,
    ];

    /// Error and Panic count as errors.
    pub fn is_error(self) -> bool {
        self >= Severity::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ignore => "ignore",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Panic => "panic",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a diagnostic originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Caused by user input or configuration.
    User,
    /// Failure to resolve a provider, policy or other reference.
    Resolving,
    /// Bug or invariant violation inside Stratus itself.
    Internal,
    /// Transport-level failure talking to a cloud API.
    Network,
    /// Failure talking to the result database.
    Database,
    /// The provider plugin misbehaved (crash, protocol error, bad exit).
    Plugin,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::User => "user",
            DiagnosticKind::Resolving => "resolving",
            DiagnosticKind::Internal => "internal",
            DiagnosticKind::Network => "network",
            DiagnosticKind::Database => "database",
            DiagnosticKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn one() -> u64 {
    1
}

/// One-pass matcher over every secret, longest alternative first so a secret
/// containing another is replaced whole. Replacing in a single pass keeps
/// secrets from matching inside an inserted placeholder.
fn sensitive_matcher(secrets: &[String]) -> Option<Result<Regex, regex::Error>> {
    if secrets.is_empty() {
        return None;
    }
    let mut sorted: Vec<&str> = secrets.iter().map(String::as_str).collect();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.len()));
    let alternation = sorted
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");
    Some(Regex::new(&alternation))
}

fn is_one(count: &u64) -> bool {
    *count == 1
}

/// A single structured issue.
///
/// `severity` and `kind` are fixed at construction. Redaction and
/// classification produce new values instead of editing one in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    severity: Severity,
    kind: DiagnosticKind,
    summary: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    /// Substrings of `detail`/`resource` that may carry secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sensitive: Vec<String>,
    /// Number of underlying occurrences this entry stands for.
    #[serde(default = "one", skip_serializing_if = "is_one")]
    count: u64,
}

impl Diagnostic {
    /// Create a new diagnostic with an occurrence count of one.
    pub fn new(severity: Severity, kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            summary: summary.into(),
            detail: String::new(),
            resource: None,
            sensitive: Vec::new(),
            count: 1,
        }
    }

    pub fn error(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, summary)
    }

    pub fn warning(kind: DiagnosticKind, summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, summary)
    }

    /// Build an `Error` diagnostic from an error value.
    ///
    /// The summary is the top-level message; the detail is the whole
    /// `source()` chain joined with `": "`.
    pub fn from_error(err: &(dyn std::error::Error + 'static), kind: DiagnosticKind) -> Self {
        let mut chain = vec![err.to_string()];
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self::error(kind, err.to_string()).with_detail(chain.join(": "))
    }

    /// Set the long-form detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Set the resource this diagnostic concerns.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Flag a substring of `detail`/`resource` as sensitive.
    ///
    /// Empty strings are ignored.
    pub fn with_sensitive(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() && !self.sensitive.contains(&secret) {
            self.sensitive.push(secret);
        }
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn sensitive(&self) -> &[String] {
        &self.sensitive
    }

    /// Occurrence count, always at least one.
    pub fn count(&self) -> u64 {
        self.count.max(1)
    }

    /// Squash equivalence: same severity, kind and summary.
    pub fn is_equivalent(&self, other: &Diagnostic) -> bool {
        self.severity == other.severity && self.kind == other.kind && self.summary == other.summary
    }

    /// A copy with every sensitive region replaced by [`REDACTED_PLACEHOLDER`].
    pub fn redacted(&self) -> Diagnostic {
        let matcher = sensitive_matcher(&self.sensitive);
        let scrub = |text: &str| match &matcher {
            None => text.to_string(),
            Some(Ok(re)) => re.replace_all(text, REDACTED_PLACEHOLDER).into_owned(),
            // A matcher that cannot be built hides the whole value.
            Some(Err(_)) if text.is_empty() => String::new(),
            Some(Err(_)) => REDACTED_PLACEHOLDER.to_string(),
        };

        Diagnostic {
            severity: self.severity,
            kind: self.kind,
            summary: self.summary.clone(),
            detail: scrub(&self.detail),
            resource: self.resource.as_deref().map(scrub),
            sensitive: Vec::new(),
            count: self.count,
        }
    }

    /// A copy with a new kind, severity and summary, used by classification.
    pub(crate) fn reclassified(
        &self,
        kind: DiagnosticKind,
        severity: Severity,
        summary: String,
    ) -> Diagnostic {
        Diagnostic {
            severity,
            kind,
            summary,
            ..self.clone()
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.severity, self.kind, self.summary)?;
        if let Some(resource) = &self.resource {
            write!(f, " ({resource})")?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics. Insertion order is discovery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A collection holding a single diagnostic built from `err`.
    pub fn from_error(err: &(dyn std::error::Error + 'static), kind: DiagnosticKind) -> Self {
        Self(vec![Diagnostic::from_error(err, kind)])
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// Append `other` after the current entries.
    pub fn merge(mut self, other: Diagnostics) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_diags(&self) -> bool {
        !self.0.is_empty()
    }

    /// True when any entry is `Error` or `Panic`.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity.is_error())
    }

    /// Highest severity present, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.0.iter().map(Diagnostic::severity).max()
    }

    /// True if rendering would print at least one entry.
    ///
    /// `Ignore` entries are only printable in verbose mode.
    pub fn has_printable(&self, verbose: bool) -> bool {
        verbose && self.has_diags() || self.0.iter().any(|d| d.severity != Severity::Ignore)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }

    /// Count entries of `severity`.
    ///
    /// With `deep = false` each entry counts once; with `deep = true` each
    /// entry contributes its occurrence count, which after [`squash`] gives
    /// the pre-squash total.
    ///
    /// [`squash`]: Diagnostics::squash
    pub fn count_by_severity(&self, severity: Severity, deep: bool) -> u64 {
        self.0
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| if deep { d.count() } else { 1 })
            .sum()
    }

    /// Redact every entry. Length and order are preserved.
    pub fn redacted(&self) -> Diagnostics {
        Diagnostics(self.0.iter().map(Diagnostic::redacted).collect())
    }

    /// Collapse equivalent entries into one representative each.
    ///
    /// Equivalence is global: two entries collapse even when other entries
    /// sit between them. The representative is the first occurrence, stays in
    /// its position and carries the summed occurrence count.
    pub fn squash(&self) -> Diagnostics {
        let mut out: Vec<Diagnostic> = Vec::with_capacity(self.0.len());
        let mut seen: HashMap<(Severity, DiagnosticKind, &str), usize> = HashMap::new();

        for diag in &self.0 {
            let key = (diag.severity, diag.kind, diag.summary.as_str());
            match seen.get(&key) {
                Some(&idx) => out[idx].count = out[idx].count() + diag.count(),
                None => {
                    seen.insert(key, out.len());
                    let mut representative = diag.clone();
                    representative.count = diag.count();
                    out.push(representative);
                }
            }
        }

        Diagnostics(out)
    }

    /// Stable sort, most severe first. Ties keep their relative order.
    pub fn sorted(&self) -> Diagnostics {
        let mut out = self.0.clone();
        out.sort_by(|a, b| b.severity.cmp(&a.severity));
        Diagnostics(out)
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self(vec![diagnostic])
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diagnostics: Vec<Diagnostic>) -> Self {
        Self(diagnostics)
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
