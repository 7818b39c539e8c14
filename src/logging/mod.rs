// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time configurable logging.
//!
//! - `debug!()` / `info!()` / `warn!()` / `error!()` format like `println!()`.
//! - With the `logging` feature off, every macro expands to nothing: zero
//!   runtime cost, and call sites still type-check since arguments are still
//!   referenced (avoiding "unused variable" warnings at call sites).
//!
//! # Example
//!
//! ```
//! use wrtc_relay::logging::{init_logger, ConsoleOutput, LogLevel};
//! use std::sync::Arc;
//!
//! init_logger(Arc::new(ConsoleOutput::new(LogLevel::Debug)), LogLevel::Debug);
//! wrtc_relay::info!("peer {} connected", 1);
//! ```

pub mod logger;
mod output;

pub use logger::{flush_logger, init_logger};
pub use output::{ConsoleOutput, FileOutput, LogLevel, Output};

/// Debug-level log message.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        $crate::logging::logger::log_message($crate::logging::LogLevel::Debug, &format!($($arg)*));
        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    };
}

/// Info-level log message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        $crate::logging::logger::log_message($crate::logging::LogLevel::Info, &format!($($arg)*));
        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    };
}

/// Warn-level log message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        $crate::logging::logger::log_message($crate::logging::LogLevel::Warn, &format!($($arg)*));
        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    };
}

/// Error-level log message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        $crate::logging::logger::log_message($crate::logging::LogLevel::Error, &format!($($arg)*));
        #[cfg(not(feature = "logging"))]
        let _ = format_args!($($arg)*);
    };
}
