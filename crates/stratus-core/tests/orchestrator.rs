//! End-to-end orchestration behaviour: fan-out, status derivation,
//! cancellation and panic containment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stratus_core::{
    ActionContext, CancellationToken, Diagnostic, DiagnosticKind, Diagnostics, NoopSink,
    OperationStatus, Orchestrator, OrchestratorConfig, ProviderIdentity, Severity, Update,
};

fn statuses(result: &stratus_core::OrchestrationResult) -> Vec<OperationStatus> {
    result.summaries.iter().map(|s| s.status).collect()
}

fn recording_sink() -> (Arc<Mutex<Vec<Update>>>, Orchestrator) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    let orchestrator = Orchestrator::new(Arc::new(move |u: &Update| {
        sink_seen.lock().unwrap().push(u.clone());
    }));
    (seen, orchestrator)
}

#[tokio::test]
async fn test_failed_empty_and_canceled_providers() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    // Cancel the whole run once the first provider reports it is done.
    let orchestrator = Orchestrator::new(Arc::new(move |u: &Update| {
        if u.provider == "aws" && u.all_done {
            trigger.cancel();
        }
    }));

    let calls = Arc::new(AtomicUsize::new(0));
    let action_calls = Arc::clone(&calls);
    let action = move |ctx: ActionContext| {
        action_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            match ctx.identity().name.as_str() {
                "aws" => {
                    let diags: Diagnostics = vec![
                        Diagnostic::error(DiagnosticKind::Network, "ec2 describe failed"),
                        Diagnostic::error(DiagnosticKind::Network, "s3 list failed"),
                        Diagnostic::warning(DiagnosticKind::Plugin, "deprecated table"),
                    ]
                    .into();
                    ctx.emit(
                        ctx.update()
                            .progress(10, 10)
                            .diagnostics(3, diags.max_severity())
                            .done(),
                    );
                    diags
                }
                _ => {
                    ctx.emitter().progress(1, 5);
                    ctx.cancelled().await;
                    Diagnostic::warning(DiagnosticKind::Plugin, "fetch interrupted").into()
                }
            }
        }
    };

    let providers = vec![
        ProviderIdentity::new("aws").with_total(10),
        ProviderIdentity::new("gcp").with_total(0),
        ProviderIdentity::new("azure").with_total(5),
    ];
    let result = orchestrator.run("fetch", providers, action, &cancel).await;

    assert_eq!(
        statuses(&result),
        [
            OperationStatus::Failed,
            OperationStatus::Completed,
            OperationStatus::Canceled
        ]
    );
    assert_eq!(result.status, OperationStatus::Failed);
    assert!(result.has_errors());

    // Zero planned work: never invoked, still summarized.
    assert!(calls.load(Ordering::SeqCst) <= 2);
    let gcp = result.summary("gcp").expect("gcp summary");
    assert!(gcp.diagnostics.is_empty());

    let aws = result.summary("aws").expect("aws summary");
    assert_eq!(aws.diagnostics.len(), 3);
    assert_eq!(aws.done_count, 10);

    // Cancellation contributes no errors of its own.
    let azure = result.summary("azure").expect("azure summary");
    assert!(!azure.diagnostics.has_errors());
}

#[tokio::test]
async fn test_summaries_follow_input_order() {
    let names: Vec<String> = (0..12).map(|i| format!("provider-{i}")).collect();
    let action = |ctx: ActionContext| async move {
        // Later providers finish first.
        let idx: u64 = ctx.identity().name["provider-".len()..].parse().unwrap();
        tokio::time::sleep(Duration::from_millis(30 - idx * 2)).await;
        Diagnostics::new()
    };

    let providers = names.iter().map(ProviderIdentity::new).collect();
    let result = Orchestrator::new(Arc::new(NoopSink))
        .run("sync", providers, action, &CancellationToken::new())
        .await;

    let got: Vec<&str> = result.summaries.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(got, names.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(result.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_siblings() {
    let action = |ctx: ActionContext| async move {
        if ctx.identity().name == "broken" {
            return Diagnostics::from(Diagnostic::error(
                DiagnosticKind::User,
                "invalid credentials",
            ));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.emit(ctx.update().progress(1, 1).done());
        Diagnostics::new()
    };

    let providers = vec![ProviderIdentity::new("broken"), ProviderIdentity::new("healthy")];
    let result = Orchestrator::new(Arc::new(NoopSink))
        .run("fetch", providers, action, &CancellationToken::new())
        .await;

    assert_eq!(
        statuses(&result),
        [OperationStatus::Failed, OperationStatus::Completed]
    );
    assert_eq!(result.summary("healthy").unwrap().done_count, 1);
}

#[tokio::test]
async fn test_warning_only_run_is_warned() {
    let action = |_ctx: ActionContext| async {
        Diagnostics::from(Diagnostic::warning(DiagnosticKind::Plugin, "slow"))
    };
    let result = Orchestrator::new(Arc::new(NoopSink))
        .run(
            "fetch",
            vec![ProviderIdentity::new("aws"), ProviderIdentity::new("gcp")],
            action,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, OperationStatus::Warned);
    assert!(!result.has_errors());
    assert_eq!(result.diagnostics.len(), 2);
}

#[tokio::test]
async fn test_pre_canceled_run_cancels_everything_pending() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let calls = Arc::new(AtomicUsize::new(0));
    let action_calls = Arc::clone(&calls);
    let action = move |_ctx: ActionContext| {
        action_calls.fetch_add(1, Ordering::SeqCst);
        async { Diagnostics::new() }
    };

    let providers = vec![
        ProviderIdentity::new("aws"),
        ProviderIdentity::new("gcp").with_total(0),
        ProviderIdentity::new("azure"),
    ];
    let result = Orchestrator::new(Arc::new(NoopSink))
        .run("purge", providers, action, &cancel)
        .await;

    assert_eq!(
        statuses(&result),
        [
            OperationStatus::Canceled,
            OperationStatus::Completed,
            OperationStatus::Canceled
        ]
    );
    assert_eq!(result.status, OperationStatus::Canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!result.has_errors());
}

#[tokio::test]
async fn test_cancel_after_terminal_has_no_effect() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let orchestrator = Orchestrator::new(Arc::new(move |u: &Update| {
        if u.all_done {
            trigger.cancel();
        }
    }));

    let action = |ctx: ActionContext| async move {
        ctx.emit(ctx.update().progress(3, 3).done());
        Diagnostics::new()
    };
    let result = orchestrator
        .run("fetch", vec![ProviderIdentity::new("aws")], action, &cancel)
        .await;

    assert!(cancel.is_cancelled());
    assert_eq!(result.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_panicking_action_becomes_panic_diagnostic() {
    let action = |ctx: ActionContext| async move {
        if ctx.identity().name == "flaky" {
            panic!("index out of range in table resolver");
        }
        Diagnostics::new()
    };

    let providers = vec![ProviderIdentity::new("flaky"), ProviderIdentity::new("steady")];
    let result = Orchestrator::new(Arc::new(NoopSink))
        .run("fetch", providers, action, &CancellationToken::new())
        .await;

    let flaky = result.summary("flaky").unwrap();
    assert_eq!(flaky.status, OperationStatus::Failed);
    assert_eq!(flaky.diagnostics.len(), 1);

    let diag = &flaky.diagnostics.as_slice()[0];
    assert_eq!(diag.severity(), Severity::Panic);
    assert_eq!(diag.kind(), DiagnosticKind::Internal);
    assert!(diag.detail().contains("index out of range"));

    assert_eq!(result.summary("steady").unwrap().status, OperationStatus::Completed);
    assert_eq!(result.status, OperationStatus::Failed);
}

#[tokio::test]
async fn test_sink_sees_normalized_updates_only_while_running() {
    let (seen, orchestrator) = recording_sink();
    let action = |ctx: ActionContext| async move {
        ctx.emitter().progress(5, 10);
        ctx.emitter().progress(3, 10);
        ctx.emit(ctx.update().progress(10, 10).done());
        // Arrives after the terminal decision.
        ctx.emit(
            ctx.update()
                .diagnostics(1, Some(Severity::Error))
                .done(),
        );
        Diagnostics::new()
    };

    let result = orchestrator
        .run(
            "fetch",
            vec![ProviderIdentity::new("aws").with_total(10)],
            action,
            &CancellationToken::new(),
        )
        .await;

    let seen = seen.lock().unwrap();
    let done: Vec<u64> = seen.iter().map(|u| u.done_count).collect();
    assert_eq!(done, [5, 5, 10]);
    assert!(seen.last().unwrap().all_done);
    assert_eq!(result.status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_panicking_sink_does_not_lose_results() {
    let orchestrator = Orchestrator::new(Arc::new(|u: &Update| {
        if u.provider == "aws" {
            panic!("progress bar crashed");
        }
    }));
    let action = |ctx: ActionContext| async move {
        match ctx.identity().name.as_str() {
            "aws" => {
                ctx.emitter().progress(1, 2);
                ctx.emit(ctx.update().progress(2, 2).done());
                Diagnostics::new()
            }
            _ => Diagnostic::error(DiagnosticKind::Network, "list buckets failed").into(),
        }
    };

    let providers = vec![
        ProviderIdentity::new("aws").with_total(2),
        ProviderIdentity::new("gcp"),
    ];
    let result = orchestrator
        .run("fetch", providers, action, &CancellationToken::new())
        .await;

    assert_eq!(
        statuses(&result),
        [OperationStatus::Completed, OperationStatus::Failed]
    );
    assert_eq!(result.summary("aws").unwrap().done_count, 2);
    assert_eq!(result.status, OperationStatus::Failed);
    assert!(result.has_errors());
    assert_eq!(result.diagnostics.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_uncooperative_action_is_abandoned_after_grace() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let action = |_ctx: ActionContext| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Diagnostics::new()
    };
    let orchestrator = Orchestrator::new(Arc::new(NoopSink)).with_config(OrchestratorConfig {
        cancel_grace: Some(Duration::from_millis(50)),
    });
    let result = orchestrator
        .run("sync", vec![ProviderIdentity::new("stuck")], action, &cancel)
        .await;

    let stuck = result.summary("stuck").unwrap();
    assert_eq!(stuck.status, OperationStatus::Canceled);
    assert_eq!(stuck.diagnostics.len(), 1);
    assert_eq!(stuck.diagnostics.as_slice()[0].severity(), Severity::Warning);
    assert_eq!(result.status, OperationStatus::Canceled);
}
