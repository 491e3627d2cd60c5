//! Execution Gateway — gate, run under a deadline, normalize the outcome

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::GatewayConfig;
use crate::engine::{CallFrame, run_snippet};
use crate::error::GatewayError;
use crate::gate::SafetyGate;
use crate::logs::LogSink;
use crate::outcome::ExecutionOutcome;
use crate::tools::ToolTable;

/// Anything that can run a snippet against a tool table.
///
/// [`ExecutionGateway`] is the in-process realization; a process- or
/// VM-isolated executor can stand in without changing callers.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Never fails: every failure is reported through the outcome's `error`
    async fn execute(&self, snippet: &str, tools: ToolTable) -> ExecutionOutcome;
}

/// In-process executor backed by QuickJS
pub struct ExecutionGateway {
    config: GatewayConfig,
    gate: Option<SafetyGate>,
}

impl Default for ExecutionGateway {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}

impl ExecutionGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let gate = if config.gate.enabled {
            Some(SafetyGate::from_config(&config.gate))
        } else {
            debug!("Safety gate disabled by configuration");
            None
        };
        Self { config, gate }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Pre-execution screening: size limit, then the deny-list (when enabled)
    pub fn screen(&self, snippet: &str) -> Result<(), GatewayError> {
        let max = self.config.limits.max_snippet_bytes;
        if snippet.len() > max {
            warn!(
                "Gateway: rejected snippet of {} bytes (max {})",
                snippet.len(),
                max
            );
            return Err(GatewayError::Validation);
        }
        match &self.gate {
            Some(gate) => gate.check(snippet),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Executor for ExecutionGateway {
    async fn execute(&self, snippet: &str, tools: ToolTable) -> ExecutionOutcome {
        let span = info_span!("invocation", id = %uuid::Uuid::new_v4());
        self.run(snippet, tools).instrument(span).await
    }
}

impl ExecutionGateway {
    async fn run(&self, snippet: &str, tools: ToolTable) -> ExecutionOutcome {
        if let Err(e) = self.screen(snippet) {
            return ExecutionOutcome::failure(e, Vec::new());
        }

        let timeout = self.config.timeout();
        let start = Instant::now();
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + Duration::from_secs(365 * 24 * 3600));
        let logs = LogSink::from_limits(&self.config.limits);
        let cancel = CancellationToken::new();

        debug!(
            "Gateway: running snippet ({} bytes, {} tools, timeout {:?})",
            snippet.len(),
            tools.len(),
            timeout
        );

        let frame = CallFrame {
            tools,
            logs: logs.clone(),
            limits: self.config.limits.clone(),
            deadline,
            cancel: cancel.clone(),
        };
        let mut task = tokio::spawn(run_snippet(snippet.to_string(), frame).in_current_span());

        let settled = tokio::time::timeout(timeout, &mut task).await;
        let duration_ms = start.elapsed().as_millis();

        match settled {
            Ok(Ok(Ok(result))) => {
                info!("Gateway: completed in {}ms", duration_ms);
                ExecutionOutcome::success(result, logs.seal())
            }
            Ok(Ok(Err(e))) => {
                warn!("Gateway: failed after {}ms: {}", duration_ms, e);
                ExecutionOutcome::failure(e, logs.seal())
            }
            Ok(Err(join_err)) => {
                warn!("Gateway: execution task failed: {}", join_err);
                ExecutionOutcome::failure(
                    GatewayError::Runtime(format!("Execution aborted: {}", join_err)),
                    logs.seal(),
                )
            }
            Err(_) => {
                // Seal first so nothing the abandoned frame does reaches the caller
                let logs = logs.seal();
                cancel.cancel();
                task.abort();
                warn!("Gateway: execution timed out after {}ms", duration_ms);
                ExecutionOutcome::failure(GatewayError::Timeout, logs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TIMEOUT_MESSAGE, VALIDATION_MESSAGE};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::span;
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::registry::LookupSpan;

    fn gateway(timeout_ms: u64) -> ExecutionGateway {
        ExecutionGateway::new(GatewayConfig::default().with_timeout(Duration::from_millis(timeout_ms)))
    }

    /// `add` tool that records every argument list it receives
    fn recording_add() -> (ToolTable, Arc<Mutex<Vec<Vec<Value>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let tools = ToolTable::new().with_fn("add", move |args: Vec<Value>| {
            seen.lock().unwrap().push(args.clone());
            async move {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                Ok::<_, anyhow::Error>(json!(sum))
            }
        });
        (tools, calls)
    }

    fn sleeper() -> ToolTable {
        ToolTable::new().with_fn("sleep", |args: Vec<Value>| async move {
            let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, anyhow::Error>(json!(ms))
        })
    }

    #[tokio::test]
    async fn test_add_scenario() {
        let (tools, calls) = recording_add();
        let outcome = gateway(5_000)
            .execute("return await tools.add(2, 3);", tools)
            .await;
        assert_eq!(outcome, ExecutionOutcome::success(Some(json!(5)), vec![]));
        assert_eq!(*calls.lock().unwrap(), vec![vec![json!(2), json!(3)]]);
    }

    #[tokio::test]
    async fn test_eval_scenario_rejected_without_tool_call() {
        let (tools, calls) = recording_add();
        let outcome = gateway(5_000)
            .execute("const x = eval(\"1\"); return await tools.add(x, 1);", tools)
            .await;
        assert_eq!(outcome.error.as_deref(), Some(VALIDATION_MESSAGE));
        assert!(outcome.result.is_none());
        assert!(outcome.logs.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_deny_category_rejected() {
        let snippets = [
            "return eval('1');",
            "return new Function('return 1')();",
            "return (async () => {}).constructor('return 1');",
            "const m = await import('fs');",
            "return require('child_process');",
            "return process.env;",
            "return globalThis;",
            "return window.document;",
        ];
        let gw = gateway(5_000);
        for snippet in snippets {
            let (tools, calls) = recording_add();
            let outcome = gw.execute(snippet, tools).await;
            assert_eq!(outcome.error_kind(), Some(ErrorKind::Validation), "{}", snippet);
            assert!(calls.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_literal_result_no_logs() {
        let gw = gateway(5_000);
        for (snippet, expected) in [
            ("return 7;", json!(7)),
            ("return 'text';", json!("text")),
            ("return [1, 2, 3];", json!([1, 2, 3])),
            ("return { nested: { ok: true } };", json!({"nested": {"ok": true}})),
            ("return null;", Value::Null),
        ] {
            let outcome = gw.execute(snippet, ToolTable::new()).await;
            assert!(outcome.is_success(), "{}", snippet);
            assert_eq!(outcome.result.unwrap_or(Value::Null), expected);
            assert!(outcome.logs.is_empty());
        }
    }

    #[tokio::test]
    async fn test_no_return_value() {
        let outcome = gateway(5_000).execute("log('only logs');", ToolTable::new()).await;
        assert!(outcome.is_success());
        assert!(outcome.result.is_none());
        assert_eq!(outcome.logs, vec!["only logs"]);
    }

    #[tokio::test]
    async fn test_tool_invoked_exactly_once() {
        let (tools, calls) = recording_add();
        let outcome = gateway(5_000)
            .execute(
                "const a = await tools.add(10, 20, 30); return { sum: a };",
                tools,
            )
            .await;
        assert_eq!(outcome.result, Some(json!({"sum": 60})));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![json!(10), json!(20), json!(30)]);
    }

    #[tokio::test]
    async fn test_unending_suspension_times_out() {
        let started = Instant::now();
        let outcome = gateway(50)
            .execute("await new Promise(() => {}); return 1;", ToolTable::new())
            .await;
        assert_eq!(outcome.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(outcome.result.is_none());
        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_busy_loop_times_out() {
        let started = Instant::now();
        let outcome = gateway(50).execute("while (true) {}", ToolTable::new()).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test]
    async fn test_log_order_with_interleaved_tool_calls() {
        let outcome = gateway(5_000)
            .execute(
                "log('a'); await tools.sleep(5); log('b'); await tools.sleep(1); log.warn('c'); return 0;",
                sleeper(),
            )
            .await;
        assert_eq!(outcome.logs, vec!["a", "b", "[WARN] c"]);
        assert_eq!(outcome.result, Some(json!(0)));
    }

    #[tokio::test]
    async fn test_no_late_write_after_timeout() {
        let outcome = gateway(50)
            .execute(
                "log('start'); await tools.sleep(200); log('late'); return 1;",
                sleeper(),
            )
            .await;
        assert_eq!(outcome.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(outcome.logs, vec!["start"]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(outcome.logs, vec!["start"]);
        assert!(outcome.result.is_none());
    }

    #[tokio::test]
    async fn test_runtime_error_keeps_logs() {
        let outcome = gateway(5_000)
            .execute("log('before'); throw new Error('kaput');", ToolTable::new())
            .await;
        assert_eq!(outcome.error.as_deref(), Some("kaput"));
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Runtime));
        assert_eq!(outcome.logs, vec!["before"]);
    }

    #[tokio::test]
    async fn test_idempotent_outcomes() {
        let gw = gateway(5_000);
        let snippet = "log('x'); const r = await tools.add(1, 2); log.error(r); return r * 2;";
        let (first_tools, _) = recording_add();
        let (second_tools, _) = recording_add();
        let first = gw.execute(snippet, first_tools).await;
        let second = gw.execute(snippet, second_tools).await;
        assert_eq!(first, second);
        assert_eq!(first.result, Some(json!(6)));
        assert_eq!(first.logs, vec!["x", "[ERROR] 3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_invocations_are_independent() {
        let gw = Arc::new(gateway(5_000));
        let counter = Arc::new(AtomicUsize::new(0));
        let make_tools = |counter: Arc<AtomicUsize>| {
            ToolTable::new().with_fn("tick", move |_args: Vec<Value>| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, anyhow::Error>(json!(n)) }
            })
        };

        let a = {
            let gw = gw.clone();
            let tools = make_tools(counter.clone());
            tokio::spawn(async move { gw.execute("log('a'); await tools.tick(); return 'a';", tools).await })
        };
        let b = {
            let gw = gw.clone();
            let tools = make_tools(counter.clone());
            tokio::spawn(async move { gw.execute("log('b'); await tools.tick(); return 'b';", tools).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a.result, Some(json!("a")));
        assert_eq!(a.logs, vec!["a"]);
        assert_eq!(b.result, Some(json!("b")));
        assert_eq!(b.logs, vec!["b"]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_snippet_rejected() {
        let mut config = GatewayConfig::default();
        config.limits.max_snippet_bytes = 16;
        let outcome = ExecutionGateway::new(config)
            .execute("return 'this is far too long';", ToolTable::new())
            .await;
        assert_eq!(outcome.error.as_deref(), Some(VALIDATION_MESSAGE));
    }

    #[tokio::test]
    async fn test_gate_disabled_still_has_no_eval() {
        let mut config = GatewayConfig::default();
        config.gate.enabled = false;
        let outcome = ExecutionGateway::new(config)
            .execute("return eval('1');", ToolTable::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Runtime));
    }

    #[tokio::test]
    async fn test_extra_gate_pattern() {
        let mut config = GatewayConfig::default();
        config.gate.extra_patterns = vec![r"\bdebugger\b".to_string()];
        let outcome = ExecutionGateway::new(config)
            .execute("debugger; return 1;", ToolTable::new())
            .await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Validation));
    }

    #[tokio::test]
    async fn test_log_cap_applied() {
        let mut config = GatewayConfig::default();
        config.limits.max_log_lines = 3;
        let outcome = ExecutionGateway::new(config)
            .execute("for (let i = 0; i < 10; i++) { log(i); } return 'done';", ToolTable::new())
            .await;
        assert_eq!(outcome.result, Some(json!("done")));
        assert_eq!(outcome.logs, vec!["0", "1", "2", "[log limit reached]"]);
    }

    #[test]
    fn test_screen_applies_size_limit_and_gate_switch() {
        let mut config = GatewayConfig::default();
        config.limits.max_snippet_bytes = 16;
        let gw = ExecutionGateway::new(config.clone());
        assert_eq!(gw.screen("return 'this is far too long';"), Err(GatewayError::Validation));
        assert_eq!(gw.screen("return eval(1);"), Err(GatewayError::Validation));
        assert_eq!(gw.screen("return 1;"), Ok(()));

        config.gate.enabled = false;
        let gw = ExecutionGateway::new(config);
        assert_eq!(gw.screen("return eval(1);"), Ok(()));
        assert_eq!(gw.screen("return 'this is far too long';"), Err(GatewayError::Validation));
    }

    /// Collects span `id` fields and, per event, the enclosing span name
    #[derive(Clone, Default)]
    struct SpanRecorder {
        ids: Arc<Mutex<Vec<String>>>,
        events: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    struct IdField(Option<String>);

    impl tracing::field::Visit for IdField {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "id" {
                self.0 = Some(format!("{:?}", value));
            }
        }
    }

    impl<S> Layer<S> for SpanRecorder
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        fn on_new_span(&self, attrs: &span::Attributes<'_>, _id: &span::Id, _ctx: Context<'_, S>) {
            let mut field = IdField(None);
            attrs.record(&mut field);
            if let Some(id) = field.0 {
                self.ids.lock().unwrap().push(id);
            }
        }

        fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
            let span = ctx.event_span(event).map(|s| s.name().to_string());
            self.events
                .lock()
                .unwrap()
                .push((event.metadata().target().to_string(), span));
        }
    }

    #[tokio::test]
    async fn test_each_invocation_runs_in_its_own_span() {
        let (tools, _) = recording_add();
        let gw = gateway(5_000);
        let recorder = SpanRecorder::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

        gw.execute("return await tools.add(1, 2);", tools.clone()).await;
        gw.execute("return await tools.add(3, 4);", tools).await;

        let ids = recorder.ids.lock().unwrap().clone();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        for id in &ids {
            assert!(uuid::Uuid::parse_str(id).is_ok(), "{}", id);
        }

        let events = recorder.events.lock().unwrap().clone();
        let engine_events = events
            .iter()
            .filter(|(target, _)| target.starts_with("codegate_core::engine"))
            .count();
        assert!(engine_events >= 2);
        let tool_events = events
            .iter()
            .filter(|(target, _)| target.starts_with("codegate_core::tools"))
            .count();
        assert!(tool_events >= 2);
        for (target, span) in &events {
            assert_eq!(span.as_deref(), Some("invocation"), "{}", target);
        }
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let executor: Arc<dyn Executor> = Arc::new(ExecutionGateway::default());
        let outcome = executor.execute("return 1 + 1;", ToolTable::new()).await;
        assert_eq!(outcome.result, Some(json!(2)));
    }
}
