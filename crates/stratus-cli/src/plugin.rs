//! Out-of-process provider plugins.
//!
//! A plugin is launched with its manifest command plus the action arguments
//! (`fetch`, `sync`, `purge --last-update <secs> [--dry-run]`,
//! `policy-run <policy>`) and reports on stdout as JSON lines:
//!
//! ```text
//! {"type":"progress","done":3,"total":40}
//! {"type":"diagnostic","severity":"error","kind":"network","summary":"...","detail":"..."}
//! {"type":"affected","resource":"aws_ec2_instances","count":12}
//! {"type":"done"}
//! ```
//!
//! `affected` is only meaningful for purge and reports how many resources of
//! a table were (or, with `--dry-run`, would be) removed.
//!
//! Everything that goes wrong with the plugin itself becomes a diagnostic.

use std::collections::{BTreeMap, HashMap};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stratus_core::{
    ActionContext, Diagnostic, DiagnosticKind, Diagnostics, ProviderAction, Severity,
};

use crate::manifest::ProviderSpec;

/// Lines of plugin stderr kept for the exit diagnostic.
const STDERR_TAIL_LINES: usize = 5;

/// How long stderr may stay open after the plugin exited, e.g. held by a
/// background process it left behind.
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// The action a plugin is asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCommand {
    Fetch,
    Sync,
    Purge { last_update: Duration, dry_run: bool },
    PolicyRun { policy: String },
}

impl PluginCommand {
    /// Arguments appended to the manifest command.
    pub fn args(&self) -> Vec<String> {
        match self {
            PluginCommand::Fetch => vec!["fetch".to_string()],
            PluginCommand::Sync => vec!["sync".to_string()],
            PluginCommand::Purge {
                last_update,
                dry_run,
            } => {
                let mut args = vec![
                    "purge".to_string(),
                    "--last-update".to_string(),
                    last_update.as_secs().to_string(),
                ];
                if *dry_run {
                    args.push("--dry-run".to_string());
                }
                args
            }
            PluginCommand::PolicyRun { policy } => vec!["policy-run".to_string(), policy.clone()],
        }
    }

    /// Short label used in logs and headings.
    pub fn label(&self) -> &'static str {
        match self {
            PluginCommand::Fetch => "fetch",
            PluginCommand::Sync => "sync",
            PluginCommand::Purge { .. } => "purge",
            PluginCommand::PolicyRun { .. } => "policy run",
        }
    }
}

/// Knobs for plugin execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PluginConfig {
    /// Applied to providers that do not set `timeout_secs`. `None` disables it.
    pub default_timeout: Option<Duration>,
}

/// One line of plugin output.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginMessage {
    Progress {
        done: u64,
        total: u64,
    },
    Diagnostic {
        severity: Severity,
        kind: DiagnosticKind,
        summary: String,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        resource: Option<String>,
        #[serde(default)]
        sensitive: Vec<String>,
    },
    Affected {
        resource: String,
        count: u64,
    },
    Done,
}

/// Per-resource counts reported through `affected` messages, summed across
/// providers. Clones share the same counts.
#[derive(Debug, Clone, Default)]
pub struct AffectedResources(Arc<Mutex<BTreeMap<String, u64>>>);

impl AffectedResources {
    fn add(&self, resource: String, count: u64) {
        let mut counts = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(resource).or_default() += count;
    }

    /// Counts by resource, sorted by resource name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn total(&self) -> u64 {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

/// Why a plugin was stopped before it exited on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Canceled,
    TimedOut,
}

/// Runs a [`PluginCommand`] against manifest providers as subprocesses.
#[derive(Debug, Clone)]
pub struct PluginAction {
    specs: HashMap<String, ProviderSpec>,
    command: PluginCommand,
    config: PluginConfig,
    affected: AffectedResources,
}

impl PluginAction {
    pub fn new(specs: Vec<ProviderSpec>, command: PluginCommand, config: PluginConfig) -> Self {
        let specs = specs
            .into_iter()
            .map(|spec| (spec.identity().key(), spec))
            .collect();
        Self {
            specs,
            command,
            config,
            affected: AffectedResources::default(),
        }
    }

    pub fn command(&self) -> &PluginCommand {
        &self.command
    }

    /// Handle to the `affected` counts; keep a clone before handing the
    /// action to the orchestrator.
    pub fn affected(&self) -> AffectedResources {
        self.affected.clone()
    }

    fn spawn(&self, spec: &ProviderSpec) -> std::io::Result<Child> {
        let (program, fixed_args) = spec
            .command
            .split_first()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;
        Command::new(program)
            .args(fixed_args)
            .args(self.command.args())
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[async_trait]
impl ProviderAction for PluginAction {
    async fn execute(&self, ctx: ActionContext) -> Diagnostics {
        let key = ctx.identity().key();
        let Some(spec) = self.specs.get(&key) else {
            return Diagnostics::from(
                Diagnostic::error(DiagnosticKind::Resolving, "provider not found")
                    .with_detail(format!("no plugin configured for '{key}'"))
                    .with_resource(key),
            );
        };

        let mut run = PluginRun::new(&ctx, key.clone(), spec.secret_values(), &self.affected);
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .or(self.config.default_timeout);

        let mut child = match self.spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                run.push(
                    Diagnostic::error(DiagnosticKind::Plugin, "failed to start provider plugin")
                        .with_detail(format!("{}: {e}", spec.command.join(" ")))
                        .with_resource(key),
                );
                return run.finish();
            }
        };
        debug!(provider = %key, command = %self.command.label(), "plugin started");

        let mut stderr = child.stderr.take().map(|err| tokio::spawn(read_tail(err)));
        let Some(stdout) = child.stdout.take() else {
            run.push(
                Diagnostic::error(DiagnosticKind::Internal, "provider plugin stdout unavailable")
                    .with_resource(key),
            );
            return run.finish();
        };
        let mut lines = BufReader::new(stdout).lines();

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let interrupted = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => run.handle_line(&line),
                    Ok(None) => break None,
                    Err(e) => {
                        run.push(
                            Diagnostic::warning(DiagnosticKind::Plugin, "failed to read provider output")
                                .with_detail(e.to_string())
                                .with_resource(key.as_str()),
                        );
                        break None;
                    }
                },
                _ = ctx.cancelled() => break Some(Interrupt::Canceled),
                _ = &mut deadline => break Some(Interrupt::TimedOut),
            }
        };

        let exited = match interrupted {
            Some(interrupt) => Err(interrupt),
            None => tokio::select! {
                exited = wait_with_tail(&mut child, stderr.as_mut()) => Ok(exited),
                _ = ctx.cancelled() => Err(Interrupt::Canceled),
                _ = &mut deadline => Err(Interrupt::TimedOut),
            },
        };
        if let Some(handle) = stderr {
            handle.abort();
        }

        let (status, stderr_tail) = match exited {
            Ok(exited) => exited,
            Err(interrupt) => {
                let _ = child.kill().await;
                match interrupt {
                    Interrupt::Canceled => warn!(provider = %key, "canceled; stopped plugin"),
                    Interrupt::TimedOut => {
                        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                        run.push(
                            Diagnostic::error(DiagnosticKind::Plugin, "provider timed out")
                                .with_detail(format!("no result after {secs}s"))
                                .with_resource(key),
                        );
                    }
                }
                return run.finish();
            }
        };

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                let mut detail = format!("plugin exited with {status}");
                if !stderr_tail.is_empty() {
                    detail.push_str(": ");
                    detail.push_str(&stderr_tail);
                }
                run.push(
                    Diagnostic::error(DiagnosticKind::Plugin, "provider plugin failed")
                        .with_detail(detail)
                        .with_resource(key),
                );
            }
            Err(e) => run.push(
                Diagnostic::error(DiagnosticKind::Plugin, "provider plugin failed")
                    .with_detail(format!("failed to wait for plugin: {e}"))
                    .with_resource(key),
            ),
        }
        run.finish()
    }
}

/// Wait for the plugin to exit, then collect its stderr tail. Stderr still
/// open after [`STDERR_DRAIN_GRACE`] yields an empty tail.
async fn wait_with_tail(
    child: &mut Child,
    stderr: Option<&mut JoinHandle<String>>,
) -> (std::io::Result<ExitStatus>, String) {
    let status = child.wait().await;
    let tail = match stderr {
        Some(handle) => match tokio::time::timeout(STDERR_DRAIN_GRACE, handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => String::new(),
        },
        None => String::new(),
    };
    (status, tail)
}

/// Last few lines of a plugin's stderr, joined with `" | "`.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut raw = String::new();
    if reader.read_to_string(&mut raw).await.is_err() {
        return String::new();
    }
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// Per-invocation bookkeeping: collected diagnostics and progress counters.
struct PluginRun<'a> {
    ctx: &'a ActionContext,
    resource: String,
    secrets: Vec<String>,
    affected: &'a AffectedResources,
    diagnostics: Diagnostics,
    done: u64,
    total: u64,
}

impl<'a> PluginRun<'a> {
    fn new(
        ctx: &'a ActionContext,
        resource: String,
        secrets: Vec<String>,
        affected: &'a AffectedResources,
    ) -> Self {
        Self {
            total: ctx.identity().total_count,
            ctx,
            resource,
            secrets,
            affected,
            diagnostics: Diagnostics::new(),
            done: 0,
        }
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        let diagnostic = self
            .secrets
            .iter()
            .fold(diagnostic, |d, secret| d.with_sensitive(secret.as_str()));
        self.diagnostics.push(diagnostic);
    }

    fn emit(&self, all_done: bool) {
        let update = self
            .ctx
            .update()
            .progress(self.done, self.total)
            .diagnostics(
                self.diagnostics.len() as u64,
                self.diagnostics.max_severity(),
            );
        self.ctx.emit(if all_done { update.done() } else { update });
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<PluginMessage>(line) {
            Ok(PluginMessage::Progress { done, total }) => {
                self.done = done;
                self.total = total;
                self.emit(false);
            }
            Ok(PluginMessage::Diagnostic {
                severity,
                kind,
                summary,
                detail,
                resource,
                sensitive,
            }) => {
                let mut diagnostic = Diagnostic::new(severity, kind, summary).with_detail(detail);
                if let Some(resource) = resource {
                    diagnostic = diagnostic.with_resource(resource);
                }
                let diagnostic = sensitive
                    .into_iter()
                    .fold(diagnostic, Diagnostic::with_sensitive);
                self.push(diagnostic);
                self.emit(false);
            }
            Ok(PluginMessage::Affected { resource, count }) => self.affected.add(resource, count),
            Ok(PluginMessage::Done) => self.emit(true),
            Err(e) => {
                self.push(
                    Diagnostic::warning(DiagnosticKind::Plugin, "malformed provider output")
                        .with_detail(format!("{e}: {line}"))
                        .with_resource(self.resource.as_str()),
                );
            }
        }
    }

    fn finish(self) -> Diagnostics {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args() {
        assert_eq!(PluginCommand::Fetch.args(), ["fetch"]);
        let purge = PluginCommand::Purge {
            last_update: Duration::from_secs(3600),
            dry_run: true,
        };
        assert_eq!(purge.args(), ["purge", "--last-update", "3600", "--dry-run"]);
        assert_eq!(purge.label(), "purge");

        let policy = PluginCommand::PolicyRun {
            policy: "cis-1.4".to_string(),
        };
        assert_eq!(policy.args(), ["policy-run", "cis-1.4"]);
    }

    #[test]
    fn test_parse_messages() {
        let progress: PluginMessage =
            serde_json::from_str(r#"{"type":"progress","done":2,"total":9}"#).unwrap();
        assert_eq!(progress, PluginMessage::Progress { done: 2, total: 9 });

        let diag: PluginMessage = serde_json::from_str(
            r#"{"type":"diagnostic","severity":"warning","kind":"network","summary":"slow"}"#,
        )
        .unwrap();
        assert!(matches!(
            diag,
            PluginMessage::Diagnostic { severity: Severity::Warning, ref detail, .. } if detail.is_empty()
        ));

        let affected: PluginMessage =
            serde_json::from_str(r#"{"type":"affected","resource":"aws_s3_buckets","count":4}"#)
                .unwrap();
        assert_eq!(
            affected,
            PluginMessage::Affected {
                resource: "aws_s3_buckets".to_string(),
                count: 4
            }
        );

        let done: PluginMessage = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(done, PluginMessage::Done);
    }

    #[test]
    fn test_affected_resources_sum_per_resource() {
        let affected = AffectedResources::default();
        let shared = affected.clone();
        shared.add("aws_s3_buckets".to_string(), 4);
        shared.add("aws_ec2_instances".to_string(), 2);
        affected.add("aws_s3_buckets".to_string(), 1);

        assert_eq!(affected.total(), 7);
        let counts: Vec<(String, u64)> = affected.snapshot().into_iter().collect();
        assert_eq!(
            counts,
            [
                ("aws_ec2_instances".to_string(), 2),
                ("aws_s3_buckets".to_string(), 5)
            ]
        );
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_lines() {
        let raw = (1..=8).map(|i| format!("line {i}\n")).collect::<String>();
        let tail = read_tail(raw.as_bytes()).await;
        assert_eq!(tail, "line 4 | line 5 | line 6 | line 7 | line 8");
    }
}
