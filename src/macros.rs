// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient format-style logging

/// Log a formatted message at debug level
///
/// # Examples
/// ```ignore
/// log_debug!(logger, "retry {} of {}", attempt, max);
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::Level::Debug, format_args!($($arg)*))
    };
}

/// Log a formatted message at info level
///
/// # Examples
/// ```ignore
/// log_info!(logger, "listening on {}", addr);
/// ```
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::Level::Info, format_args!($($arg)*))
    };
}

/// Log a formatted message at warn level
///
/// # Examples
/// ```ignore
/// log_warn!(logger, "queue depth {} near limit", depth);
/// ```
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::Level::Warn, format_args!($($arg)*))
    };
}

/// Log a formatted message at error level
///
/// # Examples
/// ```ignore
/// log_error!(logger, "request failed: {}", err);
/// ```
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::Level::Error, format_args!($($arg)*))
    };
}

/// Log a formatted message at fatal level, then panic. The record is
/// committed to the ring before the panic unwinds.
///
/// # Examples
/// ```ignore
/// log_fatal!(logger, "invariant broken: {}", detail);
/// ```
#[macro_export]
macro_rules! log_fatal {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::Level::Fatal, format_args!($($arg)*))
    };
}
