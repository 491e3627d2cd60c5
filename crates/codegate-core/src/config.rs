//! Gateway configuration — deadline, gate settings and resource limits

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration, loadable from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Wall-clock deadline for one invocation, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub limits: ResourceLimits,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            gate: GateConfig::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse gateway config")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }
}

/// Safety Gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Trusted deployments may turn the gate off entirely
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Extra deny regexes appended after the built-in set
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_patterns: Vec::new(),
        }
    }
}

/// Resource limits for a single invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_max_stack_kb")]
    pub max_stack_kb: u64,
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
    #[serde(default = "default_max_log_line_bytes")]
    pub max_log_line_bytes: usize,
    #[serde(default = "default_max_snippet_bytes")]
    pub max_snippet_bytes: usize,
}

fn default_memory_mb() -> u64 {
    64
}
fn default_max_stack_kb() -> u64 {
    512
}
fn default_max_log_lines() -> usize {
    1000
}
fn default_max_log_line_bytes() -> usize {
    8 * 1024
}
fn default_max_snippet_bytes() -> usize {
    100_000
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            max_stack_kb: default_max_stack_kb(),
            max_log_lines: default_max_log_lines(),
            max_log_line_bytes: default_max_log_line_bytes(),
            max_snippet_bytes: default_max_snippet_bytes(),
        }
    }
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> usize {
        usize::try_from(self.memory_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn stack_bytes(&self) -> usize {
        usize::try_from(self.max_stack_kb.saturating_mul(1024)).unwrap_or(usize::MAX)
    }
}
