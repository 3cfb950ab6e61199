//! Human-readable output for orchestration results.
//!
//! All printers write to a caller-supplied `io::Write` so they can be tested
//! against a buffer.

use std::collections::BTreeMap;
use std::io::{self, Write};

use stratus_core::{
    Diagnostic, Diagnostics, DiagnosticsEngine, OperationStatus, OrchestrationResult,
    ProviderSummary, Severity,
};

/// Rendering switches shared by every printer.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub verbose: bool,
    pub engine: DiagnosticsEngine,
}

/// Issue count for `severities`: `""` when there are none, `"N"` normally,
/// `"N(M)"` in verbose mode where `M` counts every occurrence.
pub fn format_issues(diagnostics: &Diagnostics, severities: &[Severity], verbose: bool) -> String {
    let shallow: u64 = severities
        .iter()
        .map(|sev| diagnostics.count_by_severity(*sev, false))
        .sum();
    if shallow == 0 {
        return String::new();
    }
    if !verbose {
        return shallow.to_string();
    }
    let deep: u64 = severities
        .iter()
        .map(|sev| diagnostics.count_by_severity(*sev, true))
        .sum();
    format!("{shallow}({deep})")
}

fn status_marker(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Completed => "✅",
        OperationStatus::Warned => "⚠️",
        OperationStatus::Failed => "❌",
        OperationStatus::Canceled => "❌ (canceled)",
        OperationStatus::Pending | OperationStatus::Running => "…",
    }
}

/// One summary line per provider, plus a hint when issues were hidden.
pub fn print_provider_summary<W: Write>(
    out: &mut W,
    action: &str,
    summary: &ProviderSummary,
    opts: &RenderOptions,
) -> io::Result<()> {
    let key = summary.key();
    let diagnostics = opts.engine.process(&summary.diagnostics);

    write!(
        out,
        "Provider {key} {action} summary: {} Total resources: {}/{}",
        status_marker(summary.status),
        summary.done_count,
        summary.total_count,
    )?;

    let errors = format_issues(&diagnostics, &[Severity::Error, Severity::Panic], opts.verbose);
    if !errors.is_empty() {
        write!(out, "\t ❌ Errors: {errors}")?;
    }
    let warnings = format_issues(&diagnostics, &[Severity::Warning], opts.verbose);
    if !warnings.is_empty() {
        write!(out, "\t ⚠️ Warnings: {warnings}")?;
    }
    let ignored = format_issues(&diagnostics, &[Severity::Ignore], opts.verbose);
    if !ignored.is_empty() {
        write!(out, "\t ❓ Ignored issues: {ignored}")?;
        if !opts.verbose {
            write!(
                out,
                "\nProvider {key} finished with {ignored} ignored issues.\
                 \nThis may be normal, however, you can use `--verbose` flag to see more details."
            )?;
        }
    }
    writeln!(out)
}

fn print_diagnostic<W: Write>(out: &mut W, diagnostic: &Diagnostic) -> io::Result<()> {
    write!(
        out,
        "{:<8} [{}] {}",
        diagnostic.severity().as_str().to_uppercase(),
        diagnostic.kind(),
        diagnostic.summary()
    )?;
    if diagnostic.count() > 1 {
        write!(out, " (x{})", diagnostic.count())?;
    }
    writeln!(out)?;
    if let Some(resource) = diagnostic.resource() {
        writeln!(out, "         resource: {resource}")?;
    }
    if !diagnostic.detail().is_empty() {
        writeln!(out, "         {}", diagnostic.detail())?;
    }
    Ok(())
}

/// Print processed diagnostics under `"<header> Diagnostics:"`.
///
/// Nothing is printed when there is nothing to show; `Ignore` entries only
/// appear in verbose mode.
pub fn print_diagnostics<W: Write>(
    out: &mut W,
    header: &str,
    diagnostics: &Diagnostics,
    opts: &RenderOptions,
) -> io::Result<()> {
    if !diagnostics.has_diags() {
        return Ok(());
    }
    let processed = opts.engine.process(diagnostics);
    if !processed.has_printable(opts.verbose) {
        return Ok(());
    }

    if header.is_empty() {
        writeln!(out, "Diagnostics:\n")?;
    } else {
        writeln!(out, "{header} Diagnostics:\n")?;
    }
    for diagnostic in processed.iter() {
        if !opts.verbose && diagnostic.severity() == Severity::Ignore {
            continue;
        }
        print_diagnostic(out, diagnostic)?;
    }
    writeln!(out)
}

/// `fetch` -> `Fetch`, `policy run` -> `Policy run`.
pub fn heading(action: &str) -> String {
    let mut chars = action.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Full text report: completion line, diagnostics, per-provider summaries.
pub fn print_result<W: Write>(
    out: &mut W,
    result: &OrchestrationResult,
    opts: &RenderOptions,
) -> io::Result<()> {
    if result.status == OperationStatus::Canceled {
        writeln!(out, "Provider {} canceled.\n", result.action)?;
    } else {
        writeln!(out, "Provider {} complete.\n", result.action)?;
    }
    print_diagnostics(out, &heading(&result.action), &result.diagnostics, opts)?;
    for summary in &result.summaries {
        print_provider_summary(out, &result.action, summary, opts)?;
    }
    Ok(())
}

/// Dry-run purge notice: the total that would be removed, then the count per
/// resource.
pub fn print_purge_notice<W: Write>(
    out: &mut W,
    affected: &BTreeMap<String, u64>,
) -> io::Result<()> {
    let total: u64 = affected.values().sum();
    writeln!(
        out,
        "Expected resources to be purged: {total}. Use --dry-run=false to purge these resources."
    )?;
    for (resource, count) in affected {
        writeln!(out, "\t{resource}: {count} resources\n")?;
    }
    Ok(())
}

/// The result with every diagnostics collection run through the engine, for
/// machine-readable output.
pub fn processed_result(result: &OrchestrationResult, opts: &RenderOptions) -> OrchestrationResult {
    let mut processed = result.clone();
    processed.diagnostics = opts.engine.process(&result.diagnostics);
    for summary in &mut processed.summaries {
        summary.diagnostics = opts.engine.process(&summary.diagnostics);
    }
    processed
}

/// Process exit code: 1 iff any diagnostic is an error.
pub fn exit_code(diagnostics: &Diagnostics) -> i32 {
    if diagnostics.has_errors() {
        1
    } else {
        0
    }
}
