//! QuickJS call frame — runs one vetted snippet with `tools` and `log` bound
//!
//! Every invocation gets a fresh runtime and context. The snippet becomes
//! the body of `async function (tools, log)`; the host bridges are handed to
//! a bootstrap shim as arguments and never appear in the global scope.
//!
//! The frame function carries a per-run random name. A snippet that closes
//! the frame early and substitutes its own function fails that name check
//! and is rejected before anything is called.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rquickjs::convert::Coerced;
use rquickjs::prelude::Async;
use rquickjs::{
    AsyncContext, AsyncRuntime, CatchResultExt, CaughtError, Ctx, Function, Object, Promise, Value,
    async_with,
};
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ResourceLimits;
use crate::error::GatewayError;
use crate::logs::{LogLevel, LogSink};
use crate::tools::ToolTable;

/// Builds the frozen `tools` object and the `log` function from the host bridges
const BOOTSTRAP: &str = r#"
(function (hostCall, hostLog, names) {
  "use strict";
  const describe = (value) => {
    if (typeof value === "string") return value;
    try {
      const text = JSON.stringify(value);
      return text === undefined ? String(value) : text;
    } catch (_) {
      return String(value);
    }
  };
  const format = (args) => args.map(describe).join(" ");
  const tools = Object.create(null);
  for (const name of names) {
    tools[name] = async (...args) => {
      const reply = JSON.parse(await hostCall(name, JSON.stringify(args)));
      if ("error" in reply) throw new Error(reply.error);
      return reply.value;
    };
  }
  const log = (...args) => { hostLog("log", format(args)); };
  log.warn = (...args) => { hostLog("warn", format(args)); };
  log.error = (...args) => { hostLog("error", format(args)); };
  return { tools: Object.freeze(tools), log: Object.freeze(log) };
})
"#;

/// Everything one run needs besides the snippet text
pub struct CallFrame {
    pub tools: ToolTable,
    pub logs: LogSink,
    pub limits: ResourceLimits,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

/// Unguessable name for this run's frame function
fn frame_name() -> String {
    format!("__frame_{}", uuid::Uuid::new_v4().simple())
}

fn wrap(name: &str, snippet: &str) -> String {
    format!(
        "(async function {}(tools, log) {{\n\"use strict\";\n{}\n}})",
        name, snippet
    )
}

/// Run the snippet to completion.
///
/// Returns the JSON form of the snippet's return value, `None` for
/// `undefined`. Synchronous JS is interrupted once the deadline passes or the
/// token is cancelled, which surfaces as [`GatewayError::Timeout`].
pub async fn run_snippet(
    snippet: String,
    frame: CallFrame,
) -> Result<Option<JsonValue>, GatewayError> {
    let CallFrame {
        tools,
        logs,
        limits,
        deadline,
        cancel,
    } = frame;

    let rt = AsyncRuntime::new()?;
    rt.set_memory_limit(limits.memory_bytes()).await;
    rt.set_max_stack_size(limits.stack_bytes()).await;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    rt.set_interrupt_handler(Some(Box::new(move || {
        let stop = cancel.is_cancelled() || Instant::now() >= deadline;
        if stop {
            flag.store(true, Ordering::Relaxed);
        }
        stop
    })))
    .await;

    let context = AsyncContext::full(&rt).await?;
    let started = Instant::now();

    let result = async_with!(context => |ctx| {
        evaluate(ctx, &snippet, &tools, &logs).await
    })
    .await;

    debug!(
        "Engine: snippet settled in {}ms",
        started.elapsed().as_millis()
    );

    if interrupted.load(Ordering::Relaxed) {
        return Err(GatewayError::Timeout);
    }
    result
}

async fn evaluate<'js>(
    ctx: Ctx<'js>,
    snippet: &str,
    tools: &ToolTable,
    logs: &LogSink,
) -> Result<Option<JsonValue>, GatewayError> {
    let bridge_tools = tools.clone();
    let host_call = Function::new(
        ctx.clone(),
        Async(move |name: String, args: String| {
            let tools = bridge_tools.clone();
            async move { dispatch(&tools, &name, &args).await }
        }),
    )?;

    let sink = logs.clone();
    let host_log = Function::new(ctx.clone(), move |channel: String, line: String| {
        sink.push(LogLevel::from_channel(&channel), &line);
    })?;

    let shim: Function = ctx.eval(BOOTSTRAP)?;
    let bindings: Object = shim.call((host_call, host_log, tools.names()))?;
    let tools_binding: Value = bindings.get("tools")?;
    let log_binding: Value = bindings.get("log")?;

    ctx.globals().remove("eval")?;

    let name = frame_name();
    let compiled: Value = ctx
        .eval(wrap(&name, snippet))
        .catch(&ctx)
        .map_err(|e| GatewayError::Runtime(describe_caught(e)))?;
    let call_frame = compiled
        .into_function()
        .filter(|f| f.get::<_, String>("name").ok().as_deref() == Some(name.as_str()))
        .ok_or_else(|| {
            warn!("Engine: snippet replaced its call frame");
            GatewayError::Validation
        })?;
    let promise: Promise = call_frame
        .call((tools_binding, log_binding))
        .catch(&ctx)
        .map_err(|e| GatewayError::Runtime(describe_caught(e)))?;
    let value: Value = promise
        .into_future::<Value>()
        .await
        .catch(&ctx)
        .map_err(|e| GatewayError::Runtime(describe_caught(e)))?;

    to_json(&ctx, value)
}

/// Forward one `tools.<name>(...)` call and wrap the reply in an envelope
async fn dispatch(tools: &ToolTable, name: &str, args: &str) -> String {
    let reply = match serde_json::from_str::<Vec<JsonValue>>(args) {
        Ok(args) => match tools.call(name, args).await {
            Ok(value) => json!({ "value": value }),
            Err(e) => json!({ "error": e.to_string() }),
        },
        Err(e) => json!({ "error": format!("Invalid tool arguments: {}", e) }),
    };
    reply.to_string()
}

fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<Option<JsonValue>, GatewayError> {
    let text = ctx
        .json_stringify(value)
        .catch(ctx)
        .map_err(|e| GatewayError::Runtime(describe_caught(e)))?;
    let Some(text) = text else {
        return Ok(None);
    };
    let text = text.to_string()?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| GatewayError::Runtime(format!("Result is not valid JSON: {}", e)))
}

/// Human-readable description of whatever the snippet threw
fn describe_caught(err: CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => exception
            .message()
            .unwrap_or_else(|| exception.to_string()),
        CaughtError::Value(value) => value
            .get::<Coerced<String>>()
            .map(|coerced| coerced.0)
            .unwrap_or_else(|_| "Unknown error".to_string()),
        CaughtError::Error(e) => e.to_string(),
    }
}
