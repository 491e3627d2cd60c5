//! Log sink — ordered, bounded capture of snippet diagnostics

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ResourceLimits;

const TRUNCATED_MARKER: &str = "…[truncated]";
const LIMIT_MARKER: &str = "[log limit reached]";

/// Channel a log line was written on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Log,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse the channel name used by the script bindings
    pub fn from_channel(channel: &str) -> Self {
        match channel {
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Log,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Log => "",
            Self::Warn => "[WARN] ",
            Self::Error => "[ERROR] ",
        }
    }
}

struct LogBuffer {
    lines: Vec<String>,
    sealed: bool,
    overflowed: bool,
    max_lines: usize,
    max_line_bytes: usize,
}

/// Append-only log shared between the script bindings and the gateway.
///
/// Appends never fail or block on anything but the inner lock. Once the
/// sink is sealed every further append is dropped.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<LogBuffer>>,
}

impl LogSink {
    pub fn new(max_lines: usize, max_line_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogBuffer {
                lines: Vec::new(),
                sealed: false,
                overflowed: false,
                max_lines,
                max_line_bytes,
            })),
        }
    }

    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self::new(limits.max_log_lines, limits.max_log_line_bytes)
    }

    fn lock(&self) -> MutexGuard<'_, LogBuffer> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one formatted line on the given channel
    pub fn push(&self, level: LogLevel, message: &str) {
        let mut buf = self.lock();
        if buf.sealed || buf.overflowed {
            return;
        }
        if buf.lines.len() >= buf.max_lines {
            buf.overflowed = true;
            buf.lines.push(LIMIT_MARKER.to_string());
            return;
        }

        let mut line = String::with_capacity(level.prefix().len() + message.len());
        line.push_str(level.prefix());
        line.push_str(message);
        if line.len() > buf.max_line_bytes {
            let mut end = buf.max_line_bytes;
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            line.truncate(end);
            line.push_str(TRUNCATED_MARKER);
        }
        buf.lines.push(line);
    }

    pub fn log(&self, message: &str) {
        self.push(LogLevel::Log, message);
    }

    pub fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }

    /// Stop accepting lines and hand back everything captured so far
    pub fn seal(&self) -> Vec<String> {
        let mut buf = self.lock();
        buf.sealed = true;
        buf.lines.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
