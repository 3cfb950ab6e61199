//! Command execution shared by every subcommand.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::ValueEnum;
use stratus_core::{
    CancellationToken, Diagnostic, DiagnosticKind, Diagnostics, OrchestrationResult, Orchestrator,
    OrchestratorConfig, TracingSink,
};
use tracing::info;

use crate::manifest::Manifest;
use crate::plugin::{PluginAction, PluginCommand, PluginConfig};
use crate::render::{self, RenderOptions};

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a `--last-update` value: plain seconds or a number with an
/// `s`/`m`/`h`/`d` suffix. Zero and garbage are user errors.
pub fn parse_last_update(raw: &str) -> std::result::Result<Duration, Diagnostics> {
    let invalid = |why: &str| -> Diagnostics {
        Diagnostic::error(DiagnosticKind::User, "invalid --last-update duration")
            .with_detail(format!("'{raw}': {why}"))
            .into()
    };

    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&raw[..idx], c),
        Some(_) => (raw, 's'),
        None => return Err(invalid("empty value")),
    };
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        other => return Err(invalid(&format!("unknown unit '{other}', expected s, m, h or d"))),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| invalid("expected a whole number such as 90s, 15m, 2h or 7d"))?;
    if value == 0 {
        return Err(invalid("duration must be greater than zero"));
    }
    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid("duration is too large"))
}

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct App {
    pub manifest: Manifest,
    pub render: RenderOptions,
    pub output: OutputFormat,
    pub plugin: PluginConfig,
    pub orchestrator: OrchestratorConfig,
}

impl App {
    /// Run `command` against the selected providers and print the report.
    ///
    /// Returns the process exit code.
    pub async fn execute<W: Write>(
        &self,
        command: PluginCommand,
        selection: &[String],
        cancel: &CancellationToken,
        out: &mut W,
    ) -> Result<i32> {
        let label = command.label();
        let dry_run = matches!(command, PluginCommand::Purge { dry_run: true, .. });
        let specs = match self.manifest.select(selection) {
            Ok(specs) => specs,
            Err(diagnostics) => return self.report_failure(label, &diagnostics, out),
        };

        let identities = specs.iter().map(|spec| spec.identity()).collect();
        let action = PluginAction::new(specs, command, self.plugin.clone());
        let affected = action.affected();
        let result = Orchestrator::new(Arc::new(TracingSink))
            .with_config(self.orchestrator.clone())
            .run(label, identities, action, cancel)
            .await;
        info!(
            orchestration_id = %result.id,
            status = %result.status,
            duration_ms = result.duration_ms(),
            "{label} finished"
        );

        self.report(&result, out)?;
        if dry_run && self.output == OutputFormat::Text && !result.has_errors() {
            render::print_purge_notice(out, &affected.snapshot())?;
        }
        Ok(render::exit_code(&result.diagnostics))
    }

    /// Print a finished orchestration in the configured format.
    pub fn report<W: Write>(&self, result: &OrchestrationResult, out: &mut W) -> Result<()> {
        match self.output {
            OutputFormat::Text => render::print_result(out, result, &self.render)?,
            OutputFormat::Json => {
                let processed = render::processed_result(result, &self.render);
                writeln!(out, "{}", processed.to_json_pretty()?)?;
            }
        }
        Ok(())
    }

    /// Print diagnostics that stopped a command before it ran.
    pub fn report_failure<W: Write>(
        &self,
        label: &str,
        diagnostics: &Diagnostics,
        out: &mut W,
    ) -> Result<i32> {
        match self.output {
            OutputFormat::Text => {
                render::print_diagnostics(out, &render::heading(label), diagnostics, &self.render)?
            }
            OutputFormat::Json => {
                let processed = self.render.engine.process(diagnostics);
                writeln!(out, "{}", serde_json::to_string_pretty(&processed)?)?;
            }
        }
        Ok(render::exit_code(diagnostics))
    }
}
