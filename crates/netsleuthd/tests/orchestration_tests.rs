//! End-to-end sessions against fake collaborators.

use netsleuth_common::{
    ActionOutcome, AlarmDetails, CapabilityCatalog, LoopState, Report, Request, Session,
    SessionStatus, TargetScope, ValidationErrorKind,
};
use netsleuthd::{
    ActionDispatcher, CancelHandle, CancelPolicy, Config, DevicePool, DispatchSettings, EngineError,
    FakeConnectivityProber, FakeDeviceExecutor, FakeReasoningEngine, LoopSettings, OrchestrationLoop,
    TroubleshootingService,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const INTERFACES_JSON: &str =
    r#"{"interfaces": {"GigabitEthernet0/1": {"status": "up"}, "GigabitEthernet0/2": {"status": "up"}}}"#;

fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.backoff_ms = 1;
    config
}

fn service(
    config: Config,
    engine: Arc<FakeReasoningEngine>,
    executor: Arc<FakeDeviceExecutor>,
    prober: Arc<FakeConnectivityProber>,
) -> TroubleshootingService {
    TroubleshootingService::new(config, engine, executor, prober)
}

fn data_request(operation_id: &str, target: &str) -> serde_json::Value {
    json!({
        "kind": "data_request",
        "rationale": format!("check {}", operation_id),
        "operations": [{"operation_id": operation_id, "target": target}]
    })
}

fn analysis(summary: &str) -> serde_json::Value {
    json!({
        "kind": "analysis",
        "summary": summary,
        "findings": ["GigabitEthernet0/1 up", "GigabitEthernet0/2 up"],
        "root_causes": ["transient alarm"],
        "next_steps": ["monitor"],
        "confidence": 0.8
    })
}

fn critical_alarm() -> AlarmDetails {
    AlarmDetails::new("Interface flapping")
        .with_severity("critical")
        .with_component("core-router-1")
}

#[tokio::test]
async fn test_alarm_single_round_analysis() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("show_interfaces", "core-router-1"),
        analysis("all interfaces up"),
    ]));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
            .build(),
    );
    let svc = service(
        test_config(),
        engine.clone(),
        executor.clone(),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.summary.as_deref(), Some("all interfaces up"));
    assert_eq!(report.iterations, 2);
    assert_eq!(report.devices, vec!["core-router-1"]);
    assert_eq!(report.operations.len(), 1);
    assert!(matches!(report.operations[0].outcome, ActionOutcome::Parsed { .. }));
    assert!(report.validation_errors.is_empty());
    assert_eq!(executor.total_calls(), 1);
    assert_eq!(engine.call_count(), 2);

    // Second prompt carries the collected data
    let prompts = engine.prompts();
    assert!(prompts[1].contains("show_interfaces"));
}

#[tokio::test]
async fn test_unknown_operation_corrected_on_retry() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("reload_device", "core-router-1"),
        data_request("show_interfaces", "core-router-1"),
        analysis("all interfaces up"),
    ]));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
            .build(),
    );
    let svc = service(
        test_config(),
        engine.clone(),
        executor.clone(),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.validation_errors.len(), 1);
    assert_eq!(report.validation_errors[0].iteration, 1);
    assert_eq!(report.validation_errors[0].error.kind, ValidationErrorKind::UnknownOperation);
    assert_eq!(report.operations.len(), 1);
    assert_eq!(executor.call_count("core-router-1", "show interfaces | json"), 1);

    // The correction prompt names the rejected operation
    let prompts = engine.prompts();
    assert!(prompts[1].contains("reload_device"));
}

#[tokio::test]
async fn test_validation_exhausted_never_dispatches() {
    let engine = Arc::new(FakeReasoningEngine::always_valid(data_request(
        "reload_device",
        "core-router-1",
    )));
    let executor = Arc::new(FakeDeviceExecutor::builder().build());
    let svc = service(
        test_config(),
        engine.clone(),
        executor.clone(),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::ValidationExhausted);
    // Initial reply plus two corrections
    assert_eq!(engine.call_count(), 3);
    assert_eq!(report.validation_errors.len(), 3);
    assert!(report.operations.is_empty());
    assert_eq!(executor.total_calls(), 0);
}

#[tokio::test]
async fn test_out_of_scope_target_rejected() {
    let engine = Arc::new(FakeReasoningEngine::always_valid(data_request(
        "show_version",
        "edge-router-9",
    )));
    let executor = Arc::new(FakeDeviceExecutor::builder().respond_any("edge-router-9", "x").build());
    let svc = service(
        test_config(),
        engine,
        executor.clone(),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::ValidationExhausted);
    assert!(report
        .validation_errors
        .iter()
        .all(|r| r.error.kind == ValidationErrorKind::OutOfScope));
    assert_eq!(executor.total_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_device_falls_back_to_connectivity_probe() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("show_version", "sw-42"),
        json!({
            "kind": "analysis",
            "summary": "sw-42 resolves but does not answer",
            "root_causes": ["device down or isolated"],
            "next_steps": ["check power and uplink"]
        }),
    ]));
    let executor = Arc::new(FakeDeviceExecutor::builder().unreachable("sw-42").build());
    let prober = Arc::new(FakeConnectivityProber::new().with_result("sw-42", false, true));
    let svc = service(test_config(), engine, executor, prober.clone());

    let report = svc
        .process_user_query("is sw-42 alive?", TargetScope::devices(["sw-42"]), vec![], vec![])
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(prober.call_count(), 1);
    assert_eq!(report.connectivity.len(), 1);
    let probe = &report.connectivity[0].probe;
    assert!(!probe.reachable);
    assert!(probe.dns_resolved);
    assert!(probe.connection_error.is_some());
    assert!(matches!(
        report.operations[0].outcome,
        ActionOutcome::ConnectivityFallback { .. }
    ));
}

#[tokio::test]
async fn test_fallback_disabled_reports_failure() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("show_version", "sw-42"),
        analysis("unreachable"),
    ]));
    let executor = Arc::new(FakeDeviceExecutor::builder().unreachable("sw-42").build());
    let prober = Arc::new(FakeConnectivityProber::new());
    let mut config = test_config();
    config.dispatch.connectivity_fallback = false;
    let svc = service(config, engine, executor, prober.clone());

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["sw-42"]))
        .await;

    assert_eq!(prober.call_count(), 0);
    assert!(report.connectivity.is_empty());
    assert!(matches!(report.operations[0].outcome, ActionOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_budget_exceeded_keeps_all_operations() {
    let engine = Arc::new(FakeReasoningEngine::always_valid(data_request(
        "show_version",
        "core-router-1",
    )));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond_any("core-router-1", "Cisco IOS Software, Version 15.2")
            .build(),
    );
    let mut config = test_config();
    config.session.max_iterations = 3;
    let svc = service(
        config,
        engine.clone(),
        executor.clone(),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::BudgetExceeded);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.operations.len(), 3);
    let iterations: Vec<u32> = report.operations.iter().map(|o| o.iteration).collect();
    assert_eq!(iterations, vec![1, 2, 3]);
    assert!(report.summary.unwrap().contains("inconclusive"));
    assert_eq!(engine.call_count(), 3);
    assert_eq!(executor.total_calls(), 3);
}

#[tokio::test]
async fn test_every_operation_yields_one_result() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        json!({
            "kind": "data_request",
            "rationale": "broad sweep",
            "operations": [
                {"operation_id": "show_version", "target": "r1"},
                {"operation_id": "show_version", "target": "r2"},
                {"operation_id": "show_logging", "target": "r1"},
                {"operation_id": "show_version", "target": "sw-42"}
            ]
        }),
        analysis("done"),
    ]));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond_any("r1", "ok")
            .command_error("r2", "show version", "% Invalid input")
            .unreachable("sw-42")
            .build(),
    );
    let svc = service(
        test_config(),
        engine,
        executor,
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["r1", "r2", "sw-42"]))
        .await;

    assert_eq!(report.operations.len(), 4);
    let targets: Vec<&str> = report.operations.iter().map(|o| o.target.as_str()).collect();
    assert_eq!(targets, vec!["r1", "r2", "r1", "sw-42"]);
    assert_eq!(report.devices, vec!["r1", "r2", "sw-42"]);
    assert!(matches!(report.operations[1].outcome, ActionOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    async fn run_once() -> String {
        let engine = Arc::new(FakeReasoningEngine::scripted(vec![
            data_request("show_interfaces", "core-router-1"),
            analysis("all interfaces up"),
        ]));
        let executor = Arc::new(
            FakeDeviceExecutor::builder()
                .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
                .build(),
        );
        let svc = service(
            test_config(),
            engine,
            executor,
            Arc::new(FakeConnectivityProber::new()),
        );
        svc.process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
            .await
            .to_json()
            .unwrap()
    }

    assert_eq!(run_once().await, run_once().await);
}

#[tokio::test]
async fn test_engine_unavailable() {
    let engine = Arc::new(FakeReasoningEngine::always_error(EngineError::HttpError(
        "connection refused".to_string(),
    )));
    let svc = service(
        test_config(),
        engine.clone(),
        Arc::new(FakeDeviceExecutor::builder().build()),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::EngineUnavailable);
    // One attempt plus the default two retries
    assert_eq!(engine.call_count(), 3);
    assert!(report.status_detail.unwrap().contains("3 attempt(s)"));
}

#[tokio::test]
async fn test_unparseable_engine_reply_is_corrected() {
    let engine = Arc::new(FakeReasoningEngine::new(vec![
        Err(EngineError::InvalidOutput("expected value at line 1".to_string())),
        Ok(analysis("recovered")),
    ]));
    let svc = service(
        test_config(),
        engine.clone(),
        Arc::new(FakeDeviceExecutor::builder().build()),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.validation_errors.len(), 1);
    assert_eq!(report.validation_errors[0].error.kind, ValidationErrorKind::Malformed);
    assert_eq!(engine.call_count(), 2);
}

#[tokio::test]
async fn test_pre_cancelled_session() {
    let engine = Arc::new(FakeReasoningEngine::always_valid(analysis("never")));
    let svc = service(
        test_config(),
        engine.clone(),
        Arc::new(FakeDeviceExecutor::builder().build()),
        Arc::new(FakeConnectivityProber::new()),
    );
    let cancel = CancelHandle::new();
    cancel.cancel("operator abort");

    let report = svc
        .process_alarm_with_cancel(critical_alarm(), TargetScope::devices(["r1"]), &cancel)
        .await;

    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.status_detail.as_deref(), Some("operator abort"));
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn test_abandon_policy_stops_in_flight_operations() {
    let engine = Arc::new(FakeReasoningEngine::always_valid(data_request("show_version", "r1")));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond_any("r1", "ok")
            .delay("r1", Duration::from_secs(30))
            .build(),
    );
    let mut config = test_config();
    config.session.cancel_policy = CancelPolicy::Abandon;
    let svc = service(
        config,
        engine,
        executor,
        Arc::new(FakeConnectivityProber::new()),
    );

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel("interrupted");
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        svc.process_alarm_with_cancel(critical_alarm(), TargetScope::devices(["r1"]), &cancel),
    )
    .await
    .unwrap();

    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.operations.len(), 1);
    match &report.operations[0].outcome {
        ActionOutcome::Failed { error } => assert!(error.starts_with("abandoned")),
        other => panic!("expected failed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_config_error_fails_without_engine_call() {
    let mut config = test_config();
    config.session.max_iterations = 0;
    let engine = Arc::new(FakeReasoningEngine::always_valid(analysis("never")));
    let svc = service(
        config,
        engine.clone(),
        Arc::new(FakeDeviceExecutor::builder().build()),
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_user_query("why?", TargetScope::devices(["r1"]), vec![], vec![])
        .await;

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.iterations, 0);
    assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn test_state_trace() {
    let catalog = Arc::new(CapabilityCatalog::standard());
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
            .build(),
    );
    let config = test_config();
    let dispatcher = ActionDispatcher::new(
        catalog.clone(),
        executor,
        Arc::new(FakeConnectivityProber::new()),
        Arc::new(DevicePool::new(4, 1)),
        DispatchSettings::from(&config.dispatch),
    );
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("reload_device", "core-router-1"),
        data_request("show_interfaces", "core-router-1"),
        analysis("all interfaces up"),
    ]));
    let orchestration = OrchestrationLoop::new(
        catalog,
        engine,
        dispatcher,
        LoopSettings::from(&config),
        CancelHandle::new().token(),
    );

    let request = Request::Alarm {
        alarm_details: critical_alarm(),
        target_scope: TargetScope::devices(["core-router-1"]),
    };
    let mut session = Session::new("trace", request);
    orchestration.run(&mut session).await;

    use LoopState::*;
    assert_eq!(
        session.states(),
        &[
            Init,
            Planning,
            Validating,
            Correcting,
            Validating,
            Dispatching,
            Consolidating,
            Planning,
            Validating,
            Finalizing,
            Done
        ]
    );
    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.history()[0].correction_attempts, 1);

    let report = Report::assemble(&session);
    assert!(report.to_markdown().contains("all interfaces up"));
}

#[tokio::test]
async fn test_analysis_with_summary_only_completes() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("show_interfaces", "core-router-1"),
        json!({"kind": "analysis", "summary": "all interfaces up"}),
    ]));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
            .build(),
    );
    let svc = service(
        test_config(),
        engine.clone(),
        executor,
        Arc::new(FakeConnectivityProber::new()),
    );

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.summary.as_deref(), Some("all interfaces up"));
    assert!(report.root_causes.is_empty());
    assert!(report.next_steps.is_empty());
    assert!(report.validation_errors.is_empty());
    assert_eq!(report.operations.len(), 1);
    assert_eq!(engine.call_count(), 2);
}

#[tokio::test]
async fn test_unbounded_session_timeout_runs_normally() {
    let engine = Arc::new(FakeReasoningEngine::scripted(vec![
        data_request("show_interfaces", "core-router-1"),
        analysis("all interfaces up"),
    ]));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond("core-router-1", "show interfaces | json", INTERFACES_JSON)
            .build(),
    );
    let mut config = test_config();
    config.session.session_timeout_secs = u64::MAX;
    config.session.cancel_policy = CancelPolicy::Abandon;
    assert!(config.validate().is_ok());
    let svc = service(config, engine, executor, Arc::new(FakeConnectivityProber::new()));

    let report = svc
        .process_alarm(critical_alarm(), TargetScope::devices(["core-router-1"]))
        .await;

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.operations.len(), 1);
}

async fn run_past_session_timeout(policy: CancelPolicy, device_delay: Duration) -> Report {
    let engine = Arc::new(FakeReasoningEngine::always_valid(data_request("show_version", "r1")));
    let executor = Arc::new(
        FakeDeviceExecutor::builder()
            .respond_any("r1", "Cisco IOS Software, Version 15.2")
            .delay("r1", device_delay)
            .build(),
    );
    let mut config = test_config();
    config.session.session_timeout_secs = 1;
    config.session.cancel_policy = policy;
    let svc = service(config, engine, executor, Arc::new(FakeConnectivityProber::new()));

    tokio::time::timeout(
        Duration::from_secs(10),
        svc.process_alarm(critical_alarm(), TargetScope::devices(["r1"])),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_session_timeout_drains_then_cancels() {
    let report = run_past_session_timeout(CancelPolicy::Drain, Duration::from_millis(1500)).await;

    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.status_detail.as_deref(), Some("session timeout"));
    // The in-flight batch finished before the session stopped
    assert_eq!(report.operations.len(), 1);
    assert!(matches!(report.operations[0].outcome, ActionOutcome::Raw { .. }));
}

#[tokio::test]
async fn test_session_timeout_abandons_in_flight_batch() {
    let report = run_past_session_timeout(CancelPolicy::Abandon, Duration::from_secs(30)).await;

    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(report.status_detail.as_deref(), Some("session timeout"));
    assert_eq!(report.operations.len(), 1);
    match &report.operations[0].outcome {
        ActionOutcome::Failed { error } => assert_eq!(error, "abandoned: session timeout"),
        other => panic!("expected failed outcome, got {:?}", other),
    }
}
