//! Stratus - cloud provider orchestration CLI
//!
//! ## Commands
//!
//! - `fetch`: Fetch resources from providers
//! - `sync`: Sync provider schemas into the result store
//! - `purge`: Remove resources not updated recently
//! - `policy run`: Run a policy against every provider

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{warn, Level};

use stratus_cli::{
    parse_last_update, App, Manifest, OutputFormat, PluginCommand, PluginConfig, RenderOptions,
};
use stratus_core::{CancellationToken, Classifier, DiagnosticsEngine, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "stratus")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run fetch, sync, purge and policy actions across cloud providers", long_about = None)]
struct Cli {
    /// Enable verbose output (ignored issues, deep counts, debug logs)
    #[arg(short, long, global = true, env = "STRATUS_VERBOSE")]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "STRATUS_LOG_JSON")]
    json: bool,

    /// Replace sensitive values in diagnostics with a placeholder
    #[arg(long, global = true, env = "STRATUS_REDACT_DIAGS")]
    redact_diags: bool,

    /// Provider manifest
    #[arg(long, global = true, env = "STRATUS_MANIFEST", default_value = "stratus.json")]
    manifest: PathBuf,

    /// Result format written to stdout
    #[arg(long, global = true, value_enum, env = "STRATUS_OUTPUT", default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Default per-provider timeout in seconds (0 disables)
    #[arg(long, global = true, env = "STRATUS_PLUGIN_TIMEOUT", default_value = "0")]
    plugin_timeout: u64,

    /// Seconds a canceled provider may take to stop before it is abandoned (0 waits indefinitely)
    #[arg(long, global = true, env = "STRATUS_CANCEL_GRACE", default_value = "30")]
    cancel_grace: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch resources from providers
    Fetch {
        /// Providers to fetch (default: all in the manifest)
        providers: Vec<String>,
    },

    /// Sync provider schemas
    Sync {
        /// Providers to sync (default: all in the manifest)
        providers: Vec<String>,
    },

    /// Remove stale resources
    Purge {
        /// Providers to purge (default: all in the manifest)
        providers: Vec<String>,

        /// Remove resources not updated within this window (e.g. 90s, 15m, 2h, 7d)
        #[arg(long, default_value = "1h")]
        last_update: String,

        /// Only report what would be removed; pass `--dry-run=false` to purge
        #[arg(
            long,
            action = ArgAction::Set,
            num_args = 0..=1,
            default_value_t = true,
            default_missing_value = "true"
        )]
        dry_run: bool,
    },

    /// Policy commands
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Run a policy against every provider in the manifest
    Run {
        /// Policy name or path
        policy: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    stratus_core::init_tracing(cli.json, level);

    let manifest = Manifest::load(&cli.manifest)
        .with_context(|| format!("Failed to load manifest {}", cli.manifest.display()))?;

    let app = App {
        manifest,
        render: RenderOptions {
            verbose: cli.verbose,
            engine: DiagnosticsEngine::new(Classifier::default()).redact(cli.redact_diags),
        },
        output: cli.output,
        plugin: PluginConfig {
            default_timeout: (cli.plugin_timeout > 0)
                .then(|| Duration::from_secs(cli.plugin_timeout)),
        },
        orchestrator: OrchestratorConfig {
            cancel_grace: (cli.cancel_grace > 0).then(|| Duration::from_secs(cli.cancel_grace)),
        },
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling providers");
            interrupt.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    let code = match cli.command {
        Commands::Fetch { providers } => {
            app.execute(PluginCommand::Fetch, &providers, &cancel, &mut stdout)
                .await?
        }
        Commands::Sync { providers } => {
            app.execute(PluginCommand::Sync, &providers, &cancel, &mut stdout)
                .await?
        }
        Commands::Purge {
            providers,
            last_update,
            dry_run,
        } => match parse_last_update(&last_update) {
            Ok(last_update) => {
                let command = PluginCommand::Purge {
                    last_update,
                    dry_run,
                };
                app.execute(command, &providers, &cancel, &mut stdout).await?
            }
            Err(diagnostics) => app.report_failure("purge", &diagnostics, &mut stdout)?,
        },
        Commands::Policy { action } => match action {
            PolicyAction::Run { policy } => {
                app.execute(PluginCommand::PolicyRun { policy }, &[], &cancel, &mut stdout)
                    .await?
            }
        },
    };
    stdout.flush()?;

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
