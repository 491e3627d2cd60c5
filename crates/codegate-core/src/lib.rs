//! codegate-core — capability-scoped script execution gateway
//!
//! Runs a JavaScript snippet against a fixed table of async tool functions
//! and returns `{ result | error, logs }`:
//! - the Safety Gate screens snippet text against a deny-list before anything runs
//! - the Execution Gateway runs the snippet in a fresh QuickJS context with
//!   only `tools` and `log` bound, under a wall-clock deadline

pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod logs;
pub mod outcome;
pub mod tools;

pub use config::{GateConfig, GatewayConfig, ResourceLimits};
pub use error::{ErrorKind, GatewayError};
pub use gate::SafetyGate;
pub use gateway::{ExecutionGateway, Executor};
pub use logs::{LogLevel, LogSink};
pub use outcome::ExecutionOutcome;
pub use tools::{FnTool, ToolHandler, ToolTable};
