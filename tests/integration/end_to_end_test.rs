//! End-to-end tests for single executions
//!
//! These drive [`RefreshEngine::execute`] through variable resolution, TOTP,
//! transport, retry, breaker and filtering with a scripted or mocked transport.

use super::{init_test_env, ScriptedTransport};
use source_refresh::clock::ManualClock;
use source_refresh::environment::{Environment, Environments, EnvironmentStore};
use source_refresh::executor::ProgressEvent;
use source_refresh::transport::{ReqwestTransport, TransportError, TransportErrorKind};
use source_refresh::{
    CircuitState, EngineConfig, ExecutionError, HttpMethod, JsonFilter, RefreshEngine, RequestBody,
    RunOptions, SourceDescriptor,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

fn create_engine(transport: Arc<ScriptedTransport>) -> RefreshEngine {
    init_test_env();
    RefreshEngine::builder()
        .config(EngineConfig::default())
        .transport(transport)
        .clock(Arc::new(ManualClock::at_unix(1_700_000_000)))
        .build()
        .expect("engine builds")
}

fn reset_error() -> Result<String, TransportError> {
    Err(TransportError::new(TransportErrorKind::ConnectionReset, "read ECONNRESET"))
}

#[tokio::test]
async fn test_local_variable_and_filter() {
    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
        200,
        r#"{"status":"ok"}"#,
    )]));
    let engine = create_engine(transport.clone());

    let source = SourceDescriptor::new("status", "https://api.example.com/{{BASE}}")
        .with_local_variable("BASE", "v1")
        .with_json_filter(JsonFilter::enabled("root.status"));

    let result = engine.execute(&source, &RunOptions::scheduled()).await.unwrap();

    assert_eq!(result.content, "ok");
    assert!(result.is_filtered);
    assert_eq!(result.filtered_with_path.as_deref(), Some("root.status"));
    assert_eq!(result.original_response, r#"{"status":"ok"}"#);
    assert_eq!(transport.requests()[0].url, "https://api.example.com/v1");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_without_counting() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        reset_error(),
        reset_error(),
        ScriptedTransport::ok(200, "fine"),
    ]));
    let engine = create_engine(transport.clone());
    let source = SourceDescriptor::new("flaky", "https://api.example.com/flaky");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let opts = RunOptions::scheduled().with_progress(move |event| sink.lock().unwrap().push(event));

    let result = engine.execute(&source, &opts).await.unwrap();

    assert_eq!(result.content, "fine");
    assert_eq!(transport.call_count(), 3);

    let snapshot = engine.breaker_snapshot("flaky");
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);

    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, ProgressEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_count_once() {
    let transport = Arc::new(ScriptedTransport::new(vec![reset_error()]));
    let engine = create_engine(transport.clone());
    let source = SourceDescriptor::new("down", "https://api.example.com/down");

    let err = engine.execute(&source, &RunOptions::scheduled()).await.unwrap_err();

    assert!(matches!(err, ExecutionError::NetworkTransient { attempts: 3, .. }));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(engine.breaker_snapshot("down").consecutive_failures, 1);
}

#[tokio::test]
async fn test_environment_and_totp_header() {
    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(200, "{}")]));

    let mut envs = Environments::new();
    let mut prod = Environment::new("prod");
    prod.set("host", "https://auth.example.com");
    prod.set("secret", RFC_SECRET);
    envs.add_environment(prod);
    let store = EnvironmentStore::new(envs);
    store.set_active_environment("prod").unwrap();

    let engine = RefreshEngine::builder()
        .config(EngineConfig::default())
        .transport(transport.clone())
        .templates(Arc::new(store))
        .clock(Arc::new(ManualClock::at_unix(59)))
        .build()
        .unwrap();

    let source = SourceDescriptor::new("otp", "{{host}}/token")
        .with_method(HttpMethod::POST)
        .with_header("X-OTP", "{{TOTP_CODE}}")
        .with_totp_secret("{{secret}}");

    engine.execute(&source, &RunOptions::scheduled()).await.unwrap();

    let request = &transport.requests()[0];
    assert_eq!(request.url, "https://auth.example.com/token");
    assert_eq!(request.header("X-OTP"), Some("287082"));

    let err = engine.execute(&source, &RunOptions::scheduled()).await.unwrap_err();
    assert_eq!(err, ExecutionError::Cooldown { remaining_seconds: 1 });
    assert_eq!(transport.call_count(), 1);
    assert_eq!(engine.breaker_snapshot("otp").consecutive_failures, 0);

    engine.end_session();
    assert!(engine.execute(&source, &RunOptions::scheduled()).await.is_ok());
}

#[tokio::test]
async fn test_unresolved_variable_fails_before_request() {
    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(200, "")]));
    let engine = create_engine(transport.clone());

    let source = SourceDescriptor::new("bad", "https://{{MISSING_HOST}}/x");
    let err = engine.execute(&source, &RunOptions::scheduled()).await.unwrap_err();

    assert_eq!(err, ExecutionError::UnresolvedVariable("MISSING_HOST".to_string()));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_test_run_returns_error_status_as_data() {
    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
        404,
        r#"{"error":"not_found","message":"no such city","status":404}"#,
    )]));
    let engine = create_engine(transport);

    let source = SourceDescriptor::new("city", "https://api.example.com/city")
        .with_json_filter(JsonFilter::enabled("root.temp"));
    let result = engine.execute(&source, &RunOptions::test()).await.unwrap();

    assert_eq!(result.status_code, 404);
    assert_eq!(result.content, "Error: not_found - no such city (status 404)");
}

#[tokio::test]
async fn test_reqwest_transport_form_post() {
    init_test_env();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(query_param("tenant", "acme"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("grant_type=client_credentials&scope=read+write"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"access_token":"t0k"}"#))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap();
    let engine = RefreshEngine::builder()
        .config(EngineConfig::default())
        .transport(Arc::new(transport))
        .build()
        .unwrap();

    let source = SourceDescriptor::new("token", format!("{}/oauth/token", server.uri()))
        .with_method(HttpMethod::POST)
        .with_query_param("tenant", "{{TENANT}}")
        .with_local_variable("TENANT", "acme")
        .with_body(
            RequestBody::Text("grant_type: client_credentials\nscope: read write".to_string()),
            Some("application/x-www-form-urlencoded"),
        )
        .with_json_filter(JsonFilter::enabled("access_token"));

    let result = engine.execute(&source, &RunOptions::test()).await.unwrap();

    assert_eq!(result.status_code, 200);
    assert_eq!(result.content, "t0k");
}
