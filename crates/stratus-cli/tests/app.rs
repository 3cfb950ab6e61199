//! End-to-end command execution against a manifest on disk.
#![cfg(unix)]

use std::io::Write as _;

use stratus_cli::{App, Manifest, OutputFormat, PluginCommand, PluginConfig, RenderOptions};
use stratus_core::{CancellationToken, Classifier, DiagnosticsEngine, OrchestratorConfig};

const MANIFEST: &str = r#"{
    "providers": [
        {
            "name": "aws",
            "alias": "aws-prod",
            "command": ["sh", "-c", "echo '{\"type\":\"progress\",\"done\":3,\"total\":3}'; echo '{\"type\":\"done\"}'", "plugin"],
            "total_count": 3
        },
        {
            "name": "gcp",
            "command": ["sh", "-c", "echo '{\"type\":\"diagnostic\",\"severity\":\"error\",\"kind\":\"internal\",\"summary\":\"list buckets\",\"detail\":\"dial tcp: connection refused\"}'", "plugin"]
        },
        {
            "name": "azure",
            "command": ["sh", "-c", "exit 0", "plugin"],
            "total_count": 0
        }
    ]
}"#;

const PURGE_MANIFEST: &str = r#"{
    "providers": [
        {
            "name": "aws",
            "command": ["sh", "-c", "echo '{\"type\":\"affected\",\"resource\":\"aws_s3_buckets\",\"count\":5}'; echo '{\"type\":\"affected\",\"resource\":\"aws_ec2_instances\",\"count\":2}'; echo '{\"type\":\"done\"}'", "plugin"]
        },
        {
            "name": "gcp",
            "command": ["sh", "-c", "echo '{\"type\":\"affected\",\"resource\":\"aws_s3_buckets\",\"count\":1}'; echo '{\"type\":\"done\"}'", "plugin"]
        }
    ]
}"#;

fn write_manifest(raw: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp manifest");
    file.write_all(raw.as_bytes()).expect("write manifest");
    file
}

fn app(output: OutputFormat, verbose: bool) -> App {
    app_with(MANIFEST, output, verbose)
}

fn app_with(raw: &str, output: OutputFormat, verbose: bool) -> App {
    let file = write_manifest(raw);
    App {
        manifest: Manifest::load(file.path()).expect("load manifest"),
        render: RenderOptions {
            verbose,
            engine: DiagnosticsEngine::new(Classifier::default()),
        },
        output,
        plugin: PluginConfig::default(),
        orchestrator: OrchestratorConfig::default(),
    }
}

async fn execute(app: &App, command: PluginCommand, selection: &[&str]) -> (i32, String) {
    let selection: Vec<String> = selection.iter().map(|s| s.to_string()).collect();
    let mut out = Vec::new();
    let code = app
        .execute(command, &selection, &CancellationToken::new(), &mut out)
        .await
        .expect("execute");
    (code, String::from_utf8(out).expect("utf8"))
}

#[tokio::test]
async fn test_fetch_all_reports_and_fails_on_errors() {
    let (code, text) = execute(&app(OutputFormat::Text, false), PluginCommand::Fetch, &[]).await;

    assert_eq!(code, 1);
    assert!(text.starts_with("Provider fetch complete."));
    assert!(text.contains("Fetch Diagnostics:"));
    // Classified from the raw driver error.
    assert!(text.contains("failed to connect to the database"));
    assert!(text.contains("Provider aws(aws-prod) fetch summary: ✅ Total resources: 3/3"));
    assert!(text.contains("Provider gcp fetch summary: ❌"));
    assert!(text.contains("Provider azure fetch summary: ✅ Total resources: 0/0"));
}

#[tokio::test]
async fn test_selected_clean_provider_exits_zero() {
    let (code, text) = execute(&app(OutputFormat::Text, false), PluginCommand::Sync, &["aws-prod"]).await;

    assert_eq!(code, 0);
    assert!(text.starts_with("Provider sync complete."));
    assert!(!text.contains("Diagnostics:"));
    assert!(!text.contains("gcp"));
}

#[tokio::test]
async fn test_unknown_provider_stops_before_running() {
    let (code, text) = execute(&app(OutputFormat::Text, false), PluginCommand::Fetch, &["oracle"]).await;

    assert_eq!(code, 1);
    assert!(text.starts_with("Fetch Diagnostics:"));
    assert!(text.contains("provider not found"));
    assert!(!text.contains("summary"));
}

#[tokio::test]
async fn test_json_output_is_parseable() {
    let (code, text) = execute(&app(OutputFormat::Json, true), PluginCommand::Fetch, &["gcp"]).await;

    assert_eq!(code, 1);
    let value: serde_json::Value = serde_json::from_str(&text).expect("json output");
    assert_eq!(value["status"], "failed");
    assert_eq!(value["action"], "fetch");
    assert_eq!(value["summaries"][0]["name"], "gcp");
    assert_eq!(value["diagnostics"][0]["kind"], "database");
}

#[tokio::test]
async fn test_dry_run_purge_reports_affected_resources() {
    let command = PluginCommand::Purge {
        last_update: std::time::Duration::from_secs(3600),
        dry_run: true,
    };
    let (code, text) = execute(&app_with(PURGE_MANIFEST, OutputFormat::Text, false), command, &[]).await;

    assert_eq!(code, 0);
    assert!(text.contains(
        "Expected resources to be purged: 8. Use --dry-run=false to purge these resources."
    ));
    assert!(text.contains("\taws_ec2_instances: 2 resources"));
    assert!(text.contains("\taws_s3_buckets: 6 resources"));
}

#[tokio::test]
async fn test_real_purge_prints_no_dry_run_notice() {
    let command = PluginCommand::Purge {
        last_update: std::time::Duration::from_secs(3600),
        dry_run: false,
    };
    let (code, text) = execute(&app_with(PURGE_MANIFEST, OutputFormat::Text, false), command, &[]).await;

    assert_eq!(code, 0);
    assert!(text.starts_with("Provider purge complete."));
    assert!(!text.contains("Expected resources to be purged"));
}

#[test]
fn test_missing_manifest_is_io_error() {
    let err = Manifest::load(std::path::Path::new("/nonexistent/stratus.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read manifest"));
}
