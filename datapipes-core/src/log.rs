//! Line-oriented logging handle passed to components through the run context

use std::sync::Mutex;

/// Destination for human-readable progress lines.
///
/// Writing a line is a side effect only; implementations must not fail.
pub trait LineLog: Send + Sync {
    /// Write one line
    fn write_line(&self, line: &str);
}

/// Forwards lines to `tracing` at info level under the
/// `datapipes::progress` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LineLog for TracingLog {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "datapipes::progress", "{line}");
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines written so far
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LineLog for MemoryLog {
    fn write_line(&self, line: &str) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push(line.to_owned());
    }
}
