// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global logger state, installed once at process start.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use super::output::{LogLevel, Output};

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}

static SINK: OnceLock<Arc<dyn Output>> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(1); // Info by default

/// Install the global log sink and minimum emitted level.
///
/// Only the first call takes effect; later calls are no-ops, matching the
/// "configure once at startup" usage pattern of the rest of this module.
pub fn init_logger(sink: Arc<dyn Output>, threshold: LogLevel) {
    THRESHOLD.store(level_to_u8(threshold), Ordering::Relaxed);
    let _ = SINK.set(sink);
}

/// Flush the installed sink, if any.
pub fn flush_logger() {
    if let Some(sink) = SINK.get() {
        sink.flush();
    }
}

#[doc(hidden)]
pub fn log_message(level: LogLevel, msg: &str) {
    if level_to_u8(level) < THRESHOLD.load(Ordering::Relaxed) {
        return;
    }
    let Some(sink) = SINK.get() else { return };
    let tag = match level {
        LogLevel::Debug => "DEBUG",
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
    };
    sink.write_line(level, &format!("[{tag}] {msg}"));
}
