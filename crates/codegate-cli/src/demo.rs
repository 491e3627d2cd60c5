//! Demo tool table exposed to snippets run from the command line
//!
//! Small, side-effect free tools so snippet authors can exercise the
//! gateway end to end: `echo`, `add`, `concat`, `sleep`, `fail`.

use anyhow::{Result, anyhow};
use codegate_core::{FnTool, ToolTable};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for `tools.sleep(ms)`
const MAX_SLEEP_MS: u64 = 60_000;

pub fn demo_tools() -> ToolTable {
    ToolTable::new()
        .with(Arc::new(
            FnTool::new("echo", |args: Vec<Value>| async move { echo(args) })
                .with_description("Return the first argument unchanged"),
        ))
        .with(Arc::new(
            FnTool::new("add", |args: Vec<Value>| async move { add(&args) })
                .with_description("Sum all numeric arguments"),
        ))
        .with(Arc::new(
            FnTool::new("concat", |args: Vec<Value>| async move { concat(&args) })
                .with_description("Join all arguments into one string"),
        ))
        .with(Arc::new(
            FnTool::new("sleep", |args: Vec<Value>| async move { sleep(&args).await })
                .with_description("Wait for the given number of milliseconds"),
        ))
        .with(Arc::new(
            FnTool::new("fail", |args: Vec<Value>| async move { fail(&args) })
                .with_description("Always fail with the given message"),
        ))
}

fn echo(args: Vec<Value>) -> Result<Value> {
    Ok(args.into_iter().next().unwrap_or(Value::Null))
}

fn add(args: &[Value]) -> Result<Value> {
    let mut int_sum: i64 = 0;
    let mut float_sum = 0.0;
    let mut all_ints = true;
    for (i, arg) in args.iter().enumerate() {
        if let Some(n) = arg.as_i64() {
            int_sum = int_sum.saturating_add(n);
            float_sum += n as f64;
        } else if let Some(n) = arg.as_f64() {
            all_ints = false;
            float_sum += n;
        } else {
            return Err(anyhow!("add: argument {} is not a number", i));
        }
    }
    Ok(if all_ints { json!(int_sum) } else { json!(float_sum) })
}

fn concat(args: &[Value]) -> Result<Value> {
    let joined: String = args
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    Ok(Value::String(joined))
}

async fn sleep(args: &[Value]) -> Result<Value> {
    let ms = args
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("sleep: expected a millisecond count"))?
        .min(MAX_SLEEP_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(json!(ms))
}

fn fail(args: &[Value]) -> Result<Value> {
    let message = args
        .first()
        .and_then(Value::as_str)
        .unwrap_or("tool failed");
    Err(anyhow!("{}", message))
}
