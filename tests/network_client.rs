// =============================================================================
// Network client, backend and assistant tests
// =============================================================================
// Retry timing is checked against tokio's paused clock, so every gap between
// recorded calls is exact.

mod support;

use assert_matches::assert_matches;
use formula_context::backend::{BackendClient, FormulaRequest, NO_FORMULA_FALLBACK, ProbeConfig};
use formula_context::builder::MapLimits;
use formula_context::config::AppConfig;
use formula_context::error::{GenerateError, NetworkError};
use formula_context::events::{AppEvent, EventBus};
use formula_context::network::{Connectivity, HttpRequest, ResilientClient, RetryConfig};
use formula_context::{App, ProbeStatus, RefreshOutcome};
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedTransport, Step};
use tempfile::TempDir;

const API_BASE: &str = "https://api.test";

fn client_over(transport: Arc<ScriptedTransport>, retry: RetryConfig) -> ResilientClient {
    ResilientClient::new(transport, Connectivity::default(), retry)
}

fn sample_request() -> FormulaRequest {
    FormulaRequest {
        query: "total units".to_string(),
        column_map: "Sheet: Sales\nunits_sold = 'Sales'!B2:B5".to_string(),
        excel_version: "16.0".to_string(),
        main_sheet: "Sales".to_string(),
    }
}

fn test_app(transport: Arc<ScriptedTransport>) -> (App, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = AppConfig {
        api_base_override: Some(format!("{API_BASE}/")),
        settings_path: dir.path().join("settings.json"),
        limits: MapLimits {
            header_rows: 1,
            ..MapLimits::default()
        },
        ..AppConfig::default()
    };
    let app = App::new(config, Arc::new(support::sales_workbook()), transport);
    (app, dir)
}

// =============================================================================
// Retry and timeout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_attempts_back_off_linearly() {
    let transport = Arc::new(ScriptedTransport::always(Step::status(503)));
    let client = client_over(transport.clone(), RetryConfig::default());

    let err = client
        .send(&HttpRequest::get(format!("{API_BASE}/health")))
        .await
        .unwrap_err();

    assert_matches!(
        &err,
        NetworkError::RetriesExhausted { attempts: 3, .. }
    );
    assert_matches!(err.last_error(), NetworkError::HttpStatus { status: 503 });
    assert_eq!(transport.call_count(), 3);
    assert_eq!(
        transport.gaps(),
        vec![Duration::from_millis(300), Duration::from_millis(600)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_first_success() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::transport("connection reset"),
        Step::ok("{\"status\":\"ok\"}"),
    ]));
    let client = client_over(transport.clone(), RetryConfig::default());

    let response = client
        .send(&HttpRequest::get(format!("{API_BASE}/health")))
        .await
        .expect("second attempt succeeds");

    assert_eq!(response.status, 200);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(transport.gaps(), vec![Duration::from_millis(300)]);
}

#[tokio::test(start_paused = true)]
async fn test_offline_fails_fast_without_calls_or_delay() {
    let transport = Arc::new(ScriptedTransport::always(Step::ok("{}")));
    let client = client_over(transport.clone(), RetryConfig::default());
    client.connectivity().set_online(false);

    let started = tokio::time::Instant::now();
    let err = client
        .send(&HttpRequest::get(format!("{API_BASE}/health")))
        .await
        .unwrap_err();

    assert_matches!(err.last_error(), NetworkError::Offline);
    assert_eq!(transport.call_count(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_hung_requests_time_out_then_retry() {
    let transport = Arc::new(ScriptedTransport::always(Step::Hang));
    let retry = RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(300),
        timeout: Duration::from_secs(1),
    };
    let client = client_over(transport.clone(), retry);

    let err = client
        .send(&HttpRequest::get(format!("{API_BASE}/slow")))
        .await
        .unwrap_err();

    assert_matches!(err.last_error(), NetworkError::Timeout(t) if *t == Duration::from_secs(1));
    assert_eq!(err.last_error().to_string(), "request timed out after 1000ms");
    assert_eq!(transport.gaps(), vec![Duration::from_millis(1300)]);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_overrides_client_default() {
    let transport = Arc::new(ScriptedTransport::always(Step::Hang));
    let client = client_over(transport.clone(), RetryConfig::default());

    let request = HttpRequest::get(format!("{API_BASE}/health")).with_timeout(Duration::from_secs(4));
    let err = client.request(&request, 1).await.unwrap_err();

    assert_matches!(err.last_error(), NetworkError::Timeout(t) if *t == Duration::from_secs(4));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_errors_stop_immediately() {
    let transport = Arc::new(ScriptedTransport::always(Step::Fail(NetworkError::Decode(
        "bad gzip".to_string(),
    ))));
    let client = client_over(transport.clone(), RetryConfig::default());

    let err = client
        .send(&HttpRequest::get(format!("{API_BASE}/health")))
        .await
        .unwrap_err();

    assert_matches!(&err, NetworkError::RetriesExhausted { attempts: 1, .. });
    assert_eq!(err.last_error().code(), "decode");
    assert_eq!(transport.call_count(), 1);
}

// =============================================================================
// Backend client
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_generate_posts_payload_and_returns_formula() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::ok(
        r#"{"formula":"=SUM('Sales'!B2:B5)"}"#,
    )]));
    let backend = BackendClient::new(
        client_over(transport.clone(), RetryConfig::default()),
        format!("{API_BASE}/"),
        ProbeConfig::default(),
        EventBus::new(),
    );

    let formula = backend
        .generate_formula(&sample_request())
        .await
        .expect("formula");

    assert_eq!(formula, "=SUM('Sales'!B2:B5)");
    let calls = transport.calls();
    assert_eq!(calls[0].url, "https://api.test/generate");
    let body = calls[0].body.as_ref().expect("json body");
    assert_eq!(body["query"], "total units");
    assert_eq!(body["mainSheet"], "Sales");
    assert_eq!(body["excelVersion"], "16.0");
}

#[tokio::test(start_paused = true)]
async fn test_missing_or_empty_formula_uses_fallback() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::ok("{}"),
        Step::ok(r#"{"formula":""}"#),
    ]));
    let backend = BackendClient::new(
        client_over(transport, RetryConfig::default()),
        API_BASE,
        ProbeConfig::default(),
        EventBus::new(),
    );

    for _ in 0..2 {
        let formula = backend
            .generate_formula(&sample_request())
            .await
            .expect("fallback formula");
        assert_eq!(formula, NO_FORMULA_FALLBACK);
    }
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_reports_ready() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::ok("ok")]));
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let backend = BackendClient::new(
        client_over(transport.clone(), RetryConfig::default()),
        API_BASE,
        ProbeConfig::default(),
        events,
    );

    assert_eq!(backend.warm_up().await, ProbeStatus::Ready);
    assert_eq!(transport.calls()[0].url, "https://api.test/health");
    assert_matches!(rx.try_recv(), Ok(AppEvent::BackendReady));
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_gives_up_after_probe_attempts() {
    let transport = Arc::new(ScriptedTransport::always(Step::status(502)));
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    let backend = BackendClient::new(
        client_over(transport.clone(), retry),
        API_BASE,
        ProbeConfig {
            attempts: 2,
            timeout: Duration::from_secs(4),
        },
        events,
    );

    assert_eq!(backend.warm_up().await, ProbeStatus::Unreachable);
    assert_eq!(transport.call_count(), 2);
    assert_matches!(
        rx.try_recv(),
        Ok(AppEvent::BackendWaking { attempt: 1, max_attempts: 2 })
    );
    assert_matches!(
        rx.try_recv(),
        Ok(AppEvent::BackendWaking { attempt: 2, max_attempts: 2 })
    );
    assert_matches!(rx.try_recv(), Ok(AppEvent::BackendUnreachable));
}

// =============================================================================
// Assistant
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_generate_sends_semantic_map_and_remembers_formula() {
    let transport = Arc::new(ScriptedTransport::new(vec![Step::ok(
        r#"{"formula":"=SUM('Sales'!B2:B5)"}"#,
    )]));
    let (mut app, _dir) = test_app(transport.clone());
    assert_matches!(app.start().await, RefreshOutcome::Rebuilt(_));

    let formula = app
        .assistant()
        .generate("  total units sold  ", "Sales")
        .await
        .expect("formula");

    assert_eq!(formula, "=SUM('Sales'!B2:B5)");
    assert_eq!(app.assistant().last_formula().as_deref(), Some(formula.as_str()));
    assert!(!app.assistant().is_generating());

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let body = calls[0].body.as_ref().expect("json body");
    assert_eq!(body["query"], "total units sold");
    assert_eq!(
        body["columnMap"],
        "Sheet: Sales\ndate = 'Sales'!A2:A5\nunits_sold = 'Sales'!B2:B5"
    );
    assert_eq!(body["excelVersion"], "16.0");
    assert_eq!(body["mainSheet"], "Sales");
}

#[tokio::test(start_paused = true)]
async fn test_compose_request_builds_missing_map() {
    let transport = Arc::new(ScriptedTransport::always(Step::ok("{}")));
    let (app, _dir) = test_app(transport);
    assert!(app.cache().current().is_none());

    let payload = app.assistant().compose_request("q", "Sales").await;

    assert!(payload.column_map.starts_with("Sheet: Sales"));
    assert_eq!(app.backend().api_base(), API_BASE);
}

#[tokio::test(start_paused = true)]
async fn test_empty_query_and_offline_are_rejected_before_sending() {
    let transport = Arc::new(ScriptedTransport::always(Step::ok("{}")));
    let (app, _dir) = test_app(transport.clone());

    assert_matches!(
        app.assistant().generate("   ", "Sales").await,
        Err(GenerateError::EmptyQuery)
    );

    app.backend().client().connectivity().set_online(false);
    assert_matches!(
        app.assistant().generate("total units", "Sales").await,
        Err(GenerateError::Offline)
    );
    assert_eq!(transport.call_count(), 0);
    assert!(app.assistant().last_formula().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_generate_is_busy_while_first_is_pending() {
    let transport = Arc::new(ScriptedTransport::always(Step::Hang));
    let (app, _dir) = test_app(transport);
    let assistant = app.assistant();

    let (first, second) = tokio::join!(
        assistant.generate("total units", "Sales"),
        assistant.generate("average units", "Sales"),
    );

    assert_matches!(second, Err(GenerateError::Busy));
    assert_matches!(
        first,
        Err(GenerateError::Network(NetworkError::RetriesExhausted { attempts: 3, .. }))
    );
    assert!(!assistant.is_generating());
    assert!(assistant.last_formula().is_none());
}
