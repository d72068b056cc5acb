//! Destinations for build output.
//!
//! Sinks are shared between the pipeline thread and whatever presents the
//! output, so every implementation is `Send + Sync`.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Append-only text stream receiving build output line by line.
pub trait OutputSink: Send + Sync {
    fn line(&self, line: &str);

    /// Labeled separator written around each pipeline stage.
    fn section(&self, title: &str) {
        self.line(&section_separator(title));
    }
}

pub fn section_separator(title: &str) -> String {
    format!("==================== {title:^20} ====================")
}

/// Writes lines to stdout, flushing after each one.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn line(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        // Output is best-effort; a closed stdout must not abort the build.
        let _ = writeln!(handle, "{line}");
        let _ = handle.flush();
    }
}

/// In-memory buffer that a presentation layer drains on its own schedule.
#[derive(Debug, Default, Clone)]
pub struct BufferedSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every line written since the last drain.
    pub fn drain(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Copy of the buffered lines without consuming them.
    pub fn snapshot(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for BufferedSink {
    fn line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
