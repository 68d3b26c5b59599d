//! Source execution.
//!
//! [`RequestExecutor::run`] turns one [`SourceDescriptor`] snapshot into one
//! [`ExecutionResult`]:
//!
//! 1. Normalize the JSON filter.
//! 2. Draw a TOTP code if the source has a secret.
//! 3. Resolve variables in the URL, headers, query parameters, body and filter path.
//! 4. Validate the resolved URL.
//! 5. Convert draft form bodies to `key=value&...`.
//! 6. Call the transport, retrying transient network failures with backoff.
//! 7. Classify the status code.
//! 8. Apply the JSON filter.
//!
//! Test runs are bounded by the configured test timeout and report error
//! statuses as data instead of failing.

pub mod config;
pub mod error;
pub mod form;
pub mod retry;

pub use config::{ProgressCallback, ProgressEvent, RunOptions};
pub use error::ExecutionError;
pub use retry::RetryPolicy;

use crate::config::EngineConfig;
use crate::environment::TemplateStore;
use crate::filter::apply_json_filter;
use crate::models::{
    ExecutionResult, JsonFilter, RequestBody, SourceDescriptor, TransportRequest, TransportResponse,
};
use crate::totp::TotpGenerator;
use crate::transport::Transport;
use crate::variables::{placeholder_names, resolve, resolve_value, ResolveContext, VarError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Executes source requests against an injected transport.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    templates: Arc<dyn TemplateStore>,
    totp: Arc<TotpGenerator>,
    config: EngineConfig,
    templates_ready: AtomicBool,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        templates: Arc<dyn TemplateStore>,
        totp: Arc<TotpGenerator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            templates,
            totp,
            config,
            templates_ready: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executes `source` once.
    ///
    /// # Arguments
    ///
    /// * `source` - Immutable snapshot of the source
    /// * `opts` - Test/scheduled flag and optional progress callback
    ///
    /// # Returns
    ///
    /// The execution result, or the first error encountered. TOTP and variable
    /// errors are returned before any request is attempted.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(source_id = %source.source_id, is_test = opts.is_test)
    )]
    pub async fn run(
        &self,
        source: &SourceDescriptor,
        opts: &RunOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        if !opts.is_test {
            return self.run_inner(source, opts).await;
        }

        let ceiling = self.config.test_timeout();
        match tokio::time::timeout(ceiling, self.run_inner(source, opts)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    source_id = %source.source_id,
                    timeout_ms = self.config.test_timeout_ms,
                    "test run timed out"
                );
                Err(ExecutionError::Timeout(self.config.test_timeout_ms))
            }
        }
    }

    async fn run_inner(
        &self,
        source: &SourceDescriptor,
        opts: &RunOptions,
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let options = &source.request_options;
        let filter = source.json_filter.normalized();

        opts.emit(ProgressEvent::Resolving);
        self.ensure_templates_ready().await;

        let totp_code = match options.totp_secret.as_deref() {
            Some(secret) if options.has_totp_secret() => {
                let plain = ResolveContext::new(self.templates.as_ref(), &options.local_variables);
                let secret = resolve(secret, &plain)?;
                Some(self.totp.generate(&secret, &source.source_id)?)
            }
            _ => None,
        };

        let ctx = ResolveContext::new(self.templates.as_ref(), &options.local_variables)
            .with_totp_code(totp_code.as_deref());

        let url = resolve(&source.url, &ctx)?;
        validate_url(&url, &source.url)?;

        let headers = resolve_pairs(&options.headers, &ctx)?;
        let query_params = resolve_pairs(&options.query_params, &ctx)?;

        let content_type = options
            .content_type
            .clone()
            .filter(|ct| !ct.trim().is_empty())
            .or_else(|| {
                headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone())
            });

        let body = match &options.body {
            None => None,
            Some(body) if body.is_empty() => None,
            Some(RequestBody::Text(text)) => Some(resolve(text, &ctx)?),
            Some(RequestBody::Json(value)) => match resolve_value(value, &ctx)? {
                Value::String(text) => Some(text),
                resolved => Some(resolved.to_string()),
            },
        };

        let body = match (body, content_type.as_deref()) {
            (Some(text), Some(ct)) if form::is_form_content_type(ct) && form::is_draft_form(&text) => {
                Some(form::draft_to_urlencoded(&text))
            }
            (body, _) => body,
        };

        let filter_path = if filter.is_active() {
            Some(resolve(&filter.path, &ctx)?)
        } else {
            None
        };

        let request = TransportRequest {
            url,
            method: source.method,
            headers,
            query_params,
            body,
            content_type,
        };

        let raw = self.send_with_retry(&source.source_id, &request, opts).await?;

        let response = TransportResponse::from_envelope(&raw)
            .map_err(|e| ExecutionError::InvalidResponseFormat(e.to_string()))?;

        if !opts.is_test && response.is_error_status() {
            tracing::debug!(
                source_id = %source.source_id,
                status_code = response.status_code,
                "error status"
            );
            return Err(ExecutionError::HttpStatus {
                status_code: response.status_code,
                body: response.body,
            });
        }

        let (content, filtered_with_path) = match filter_path {
            Some(path) if !response.body.is_empty() => {
                opts.emit(ProgressEvent::Filtering);
                let content = apply_json_filter(&response.body, &JsonFilter::enabled(path.as_str()));
                (content, Some(path))
            }
            _ => (response.body.clone(), None),
        };

        opts.emit(ProgressEvent::Completed);

        Ok(ExecutionResult {
            content,
            original_response: response.body,
            headers: response.headers,
            raw_response: raw,
            is_filtered: filtered_with_path.is_some(),
            filtered_with_path,
            duration_ms: started.elapsed().as_millis() as u64,
            status_code: response.status_code,
        })
    }

    /// Calls the transport, retrying transient failures.
    async fn send_with_retry(
        &self,
        source_id: &str,
        request: &TransportRequest,
        opts: &RunOptions,
    ) -> Result<String, ExecutionError> {
        let policy = RetryPolicy::from_config(&self.config);
        let mut attempt = 0;

        loop {
            attempt += 1;
            opts.emit(ProgressEvent::Attempt { n: attempt });

            match self.transport.make_http_request(request).await {
                Ok(raw) => return Ok(raw),
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt - 1);
                    tracing::warn!(
                        source_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient transport failure, retrying"
                    );
                    opts.emit(ProgressEvent::Retrying { attempt, delay });
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(source_id, attempts = attempt, error = %err, "retries exhausted");
                    return Err(ExecutionError::NetworkTransient {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) => return Err(ExecutionError::Transport(err)),
            }
        }
    }

    /// Waits for the template store once per session before the first resolution.
    async fn ensure_templates_ready(&self) {
        if self.templates_ready.load(Ordering::Acquire) {
            return;
        }

        let ready = self.templates.is_ready()
            || self
                .templates
                .wait_until_ready(self.config.environment_ready_timeout())
                .await;

        if ready {
            self.templates_ready.store(true, Ordering::Release);
        } else {
            tracing::warn!(
                timeout_ms = self.config.environment_ready_timeout_ms,
                "template store not ready, resolving anyway"
            );
        }
    }
}

fn resolve_pairs(
    pairs: &[crate::models::KeyValue],
    ctx: &ResolveContext<'_>,
) -> Result<Vec<(String, String)>, VarError> {
    pairs
        .iter()
        .map(|kv| Ok((kv.key.clone(), resolve(&kv.value, ctx)?)))
        .collect()
}

/// Validates a resolved URL.
///
/// An empty URL or a bare scheme almost always means a variable resolved to an
/// empty string, so the hint names the placeholders the template used.
fn validate_url(url: &str, template: &str) -> Result<(), ExecutionError> {
    let trimmed = url.trim();
    let suspects = placeholder_names(template);
    let suspect_hint = || {
        if suspects.is_empty() {
            String::new()
        } else {
            format!(
                "; check variable(s) {}",
                suspects
                    .iter()
                    .map(|name| format!("{{{{{}}}}}", name))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    };

    let invalid = |hint: String| ExecutionError::InvalidUrl {
        url: url.to_string(),
        hint,
    };

    if trimmed.is_empty() {
        return Err(invalid(format!("URL is empty{}", suspect_hint())));
    }

    if let Some(rest) = trimmed.split_once("://").map(|(_, rest)| rest) {
        if rest.trim_matches('/').is_empty() {
            return Err(invalid(format!("URL has no host{}", suspect_hint())));
        }
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| invalid(format!("{}{}", e, suspect_hint())))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!(
            "unsupported scheme '{}', only http and https are allowed",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::environment::{EnvironmentStore, Environments};
    use crate::models::{HttpMethod, KeyValue};
    use crate::totp::HmacSha1Totp;
    use crate::transport::{TransportError, TransportErrorKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<String, TransportError>>>,
        requests: Mutex<Vec<TransportRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn replying(replies: Vec<Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            })
        }

        fn sent(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn make_http_request(&self, request: &TransportRequest) -> Result<String, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok("{}")))
        }
    }

    fn ok(body: &str) -> String {
        TransportResponse::new(200, body).to_envelope()
    }

    fn status(code: u16, body: &str) -> String {
        TransportResponse::new(code, body).to_envelope()
    }

    fn create_test_executor(transport: Arc<ScriptedTransport>) -> RequestExecutor {
        let mut envs = Environments::new();
        envs.set_shared("host", "api.example.com");
        create_executor_with(transport, Arc::new(EnvironmentStore::new(envs)), EngineConfig::default())
    }

    fn create_executor_with(
        transport: Arc<ScriptedTransport>,
        store: Arc<EnvironmentStore>,
        config: EngineConfig,
    ) -> RequestExecutor {
        let totp = Arc::new(TotpGenerator::new(
            Arc::new(HmacSha1Totp),
            Arc::new(ManualClock::at_unix(59)),
        ));
        RequestExecutor::new(transport, store, totp, config)
    }

    #[tokio::test]
    async fn test_filtered_end_to_end() {
        let transport = ScriptedTransport::replying(vec![Ok(ok(r#"{"status":"ok"}"#))]);
        let executor = create_test_executor(transport.clone());

        let source = SourceDescriptor::new("s1", "https://api.example.com/{{BASE}}")
            .with_local_variable("BASE", "v1")
            .with_json_filter(JsonFilter::enabled("root.status"));

        let result = executor.run(&source, &RunOptions::scheduled()).await.unwrap();

        assert_eq!(result.content, "ok");
        assert!(result.is_filtered);
        assert_eq!(result.filtered_with_path.as_deref(), Some("root.status"));
        assert_eq!(result.original_response, r#"{"status":"ok"}"#);
        assert_eq!(result.status_code, 200);
        assert_eq!(transport.sent()[0].url, "https://api.example.com/v1");
    }

    #[tokio::test]
    async fn test_resolves_every_part_with_same_totp_code() {
        let transport = ScriptedTransport::replying(vec![Ok(ok("done"))]);
        let executor = create_test_executor(transport.clone());

        let source = SourceDescriptor::new("s1", "https://{{host}}/login")
            .with_method(HttpMethod::POST)
            .with_header("X-Otp", "{{TOTP_CODE}}")
            .with_query_param("user", "{{user}}")
            .with_local_variable("user", "ada")
            .with_body(
                RequestBody::Json(serde_json::json!({"otp": "{{TOTP_CODE}}", "user": "{{user}}"})),
                Some("application/json"),
            )
            .with_totp_secret(SECRET);

        let result = executor.run(&source, &RunOptions::scheduled()).await.unwrap();
        assert_eq!(result.content, "done");
        assert!(!result.is_filtered);

        let sent = &transport.sent()[0];
        assert_eq!(sent.url, "https://api.example.com/login");
        assert_eq!(sent.header("x-otp"), Some("287082"));
        assert_eq!(sent.query_params, vec![("user".to_string(), "ada".to_string())]);

        let body: Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"otp": "287082", "user": "ada"}));
        assert!(!format!("{:?}", sent).contains(SECRET));
    }

    #[tokio::test]
    async fn test_totp_cooldown_stops_before_transport() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport.clone());
        let source = SourceDescriptor::new("s1", "https://x.test/?otp={{TOTP_CODE}}").with_totp_secret(SECRET);

        executor.run(&source, &RunOptions::scheduled()).await.unwrap();
        let err = executor.run(&source, &RunOptions::scheduled()).await.unwrap_err();

        assert!(matches!(err, ExecutionError::Cooldown { remaining_seconds } if remaining_seconds > 0));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_secret_is_generation_error() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport.clone());
        let source = SourceDescriptor::new("s1", "https://x.test/").with_totp_secret("not-base32!");

        let err = executor.run(&source, &RunOptions::scheduled()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::TotpGeneration(_)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_secret_may_use_variables() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport.clone());
        let source = SourceDescriptor::new("s1", "https://x.test/{{TOTP_CODE}}")
            .with_local_variable("SECRET", SECRET)
            .with_totp_secret("{{SECRET}}");

        executor.run(&source, &RunOptions::scheduled()).await.unwrap();
        assert_eq!(transport.sent()[0].url, "https://x.test/287082");
    }

    #[tokio::test]
    async fn test_unresolved_variable_stops_before_transport() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport.clone());
        let source = SourceDescriptor::new("s1", "https://{{host}}/{{missing}}");

        let err = executor.run(&source, &RunOptions::scheduled()).await.unwrap_err();
        assert_eq!(err, ExecutionError::UnresolvedVariable("missing".to_string()));
        assert!(!err.counts_against_breaker());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bare_scheme_names_suspect_variable() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport);
        let source = SourceDescriptor::new("s1", "https://{{HOST}}").with_local_variable("HOST", "");

        match executor.run(&source, &RunOptions::scheduled()).await {
            Err(ExecutionError::InvalidUrl { url, hint }) => {
                assert_eq!(url, "https://");
                assert!(hint.contains("{{HOST}}"), "{}", hint);
            }
            other => panic!("expected invalid URL, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://api.example.com/v1", "").is_ok());
        assert!(validate_url("", "{{url}}").is_err());
        assert!(validate_url("http://", "").is_err());
        assert!(validate_url("ftp://files.example.com", "").is_err());
        assert!(validate_url("not a url", "").is_err());
    }

    #[tokio::test]
    async fn test_form_draft_is_encoded() {
        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_test_executor(transport.clone());
        let source = SourceDescriptor::new("s1", "https://x.test/token")
            .with_method(HttpMethod::POST)
            .with_body(
                RequestBody::Text("grant_type: client_credentials\nscope: a b".to_string()),
                Some("application/x-www-form-urlencoded"),
            );

        executor.run(&source, &RunOptions::scheduled()).await.unwrap();
        let sent = &transport.sent()[0];
        assert_eq!(sent.body.as_deref(), Some("grant_type=client_credentials&scope=a+b"));
        assert_eq!(sent.content_type.as_deref(), Some("application/x-www-form-urlencoded"));
    }

    #[tokio::test]
    async fn test_error_status_fails_scheduled_but_not_test_runs() {
        let transport = ScriptedTransport::replying(vec![
            Ok(status(500, r#"{"error":"boom"}"#)),
            Ok(status(500, r#"{"error":"boom"}"#)),
        ]);
        let executor = create_test_executor(transport);
        let source = SourceDescriptor::new("s1", "https://x.test/")
            .with_json_filter(JsonFilter::enabled("root.value"));

        let err = executor.run(&source, &RunOptions::scheduled()).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::HttpStatus {
                status_code: 500,
                body: r#"{"error":"boom"}"#.to_string()
            }
        );

        let result = executor.run(&source, &RunOptions::test()).await.unwrap();
        assert_eq!(result.status_code, 500);
        assert_eq!(result.content, "Error: boom");
    }

    #[tokio::test]
    async fn test_invalid_envelope() {
        let transport = ScriptedTransport::replying(vec![Ok("<html>".to_string())]);
        let executor = create_test_executor(transport);
        let source = SourceDescriptor::new("s1", "https://x.test/");

        let err = executor.run(&source, &RunOptions::scheduled()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidResponseFormat(_)));
        assert!(err.counts_against_breaker());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let reset = || Err(TransportError::new(TransportErrorKind::ConnectionReset, "ECONNRESET"));
        let transport = ScriptedTransport::replying(vec![reset(), reset(), Ok(ok("fine"))]);
        let executor = create_test_executor(transport.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let opts = RunOptions::scheduled().with_progress(move |e| sink.lock().unwrap().push(e));

        let result = executor
            .run(&SourceDescriptor::new("s1", "https://x.test/"), &opts)
            .await
            .unwrap();
        assert_eq!(result.content, "fine");
        assert_eq!(transport.sent().len(), 3);

        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&ProgressEvent::Resolving));
        assert_eq!(events.last(), Some(&ProgressEvent::Completed));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ProgressEvent::Retrying { .. }))
                .count(),
            2
        );
        assert!(events.contains(&ProgressEvent::Attempt { n: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let refused = || Err(TransportError::new(TransportErrorKind::ConnectionRefused, "ECONNREFUSED"));
        let transport = ScriptedTransport::replying(vec![refused(), refused(), refused(), Ok(ok("late"))]);
        let executor = create_test_executor(transport.clone());

        let err = executor
            .run(&SourceDescriptor::new("s1", "https://x.test/"), &RunOptions::scheduled())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::NetworkTransient { attempts: 3, .. }));
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_failure_not_retried() {
        let transport = ScriptedTransport::replying(vec![Err(TransportError::other("bad certificate"))]);
        let executor = create_test_executor(transport.clone());

        let err = executor
            .run(&SourceDescriptor::new("s1", "https://x.test/"), &RunOptions::scheduled())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Transport(_)));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_run_timeout() {
        let transport = Arc::new(ScriptedTransport {
            delay: Some(Duration::from_secs(60)),
            ..ScriptedTransport::default()
        });
        let executor = create_test_executor(transport);

        let err = executor
            .run(&SourceDescriptor::new("s1", "https://x.test/"), &RunOptions::test())
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_template_store() {
        let store = Arc::new(EnvironmentStore::pending());
        let loader = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let mut envs = Environments::new();
            envs.set_shared("host", "late.example.com");
            loader.load(envs);
        });

        let transport = ScriptedTransport::replying(vec![]);
        let executor = create_executor_with(transport.clone(), store, EngineConfig::default());

        executor
            .run(&SourceDescriptor::new("s1", "https://{{host}}/"), &RunOptions::scheduled())
            .await
            .unwrap();
        assert_eq!(transport.sent()[0].url, "https://late.example.com/");
    }

    #[tokio::test]
    async fn test_disabled_filter_path_is_ignored() {
        let transport = ScriptedTransport::replying(vec![Ok(ok(r#"{"a":1}"#))]);
        let executor = create_test_executor(transport);
        let source = SourceDescriptor::new("s1", "https://x.test/").with_json_filter(JsonFilter {
            enabled: false,
            path: "{{undefined}}".to_string(),
        });

        let result = executor.run(&source, &RunOptions::scheduled()).await.unwrap();
        assert_eq!(result.content, r#"{"a":1}"#);
        assert!(!result.is_filtered);
        assert!(result.filtered_with_path.is_none());
    }

    #[test]
    fn test_resolve_pairs_keeps_order() {
        let store = EnvironmentStore::default();
        let locals = vec![KeyValue::new("v", "x")];
        let ctx = ResolveContext::new(&store, &locals);
        let pairs = vec![KeyValue::new("b", "{{v}}"), KeyValue::new("a", "2")];

        assert_eq!(
            resolve_pairs(&pairs, &ctx).unwrap(),
            vec![("b".to_string(), "x".to_string()), ("a".to_string(), "2".to_string())]
        );
    }
}
