// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log sinks and severity levels.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

/// Log severity, ordered so `level >= threshold` gates emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Development/debugging information.
    Debug,
    /// General operational information.
    Info,
    /// Warning conditions.
    Warn,
    /// Error conditions.
    Error,
}

/// A destination for formatted log lines.
pub trait Output: Send + Sync {
    /// Write one already-formatted line (no trailing newline).
    fn write_line(&self, level: LogLevel, line: &str);
    /// Flush any buffered output.
    fn flush(&self);
}

/// Writes to stderr.
pub struct ConsoleOutput {
    threshold: LogLevel,
}

impl ConsoleOutput {
    /// Create a console sink that emits at or above `threshold`.
    #[must_use]
    pub fn new(threshold: LogLevel) -> Self {
        Self { threshold }
    }
}

impl Output for ConsoleOutput {
    fn write_line(&self, level: LogLevel, line: &str) {
        if level >= self.threshold {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Appends to a file, behind a mutex (one writer at a time).
pub struct FileOutput {
    threshold: LogLevel,
    file: Mutex<File>,
}

impl FileOutput {
    /// Open (or create/append) `path` as a log destination.
    pub fn new(path: &str, threshold: LogLevel) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            threshold,
            file: Mutex::new(file),
        })
    }
}

impl Output for FileOutput {
    fn write_line(&self, level: LogLevel, line: &str) {
        if level < self.threshold {
            return;
        }
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "{line}");
        }
    }

    fn flush(&self) {
        if let Ok(mut f) = self.file.lock() {
            let _ = f.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn file_output_appends_lines_at_or_above_threshold() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("relay.log");
        let output = FileOutput::new(path.to_str().unwrap(), LogLevel::Warn).expect("open should succeed");

        output.write_line(LogLevel::Debug, "should be filtered out");
        output.write_line(LogLevel::Error, "connection failed");
        output.flush();

        let mut contents = String::new();
        File::open(&path)
            .expect("log file should exist")
            .read_to_string(&mut contents)
            .expect("read should succeed");
        assert!(!contents.contains("should be filtered out"));
        assert!(contents.contains("connection failed"));
    }

    #[test]
    fn log_level_orders_by_severity() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
    }
}
