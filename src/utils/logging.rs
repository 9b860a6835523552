//! Conditional logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! Every message is prefixed with the calling module's `LOG_TAG` so the
//! interleaved output of the engine, the pollers and the OS backends can be
//! told apart in one stream.
//!
//! Usage:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "extractor";
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("capture #{} stable", 3);
//! ```

/// Conditional info logging.
///
/// Each module that uses this macro must define `ENABLE_LOGS` and `LOG_TAG`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional warn logging.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional error logging.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional debug logging. Poll loops use this for per-sample chatter.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Initialise `env_logger` once for the process.
///
/// Reads `RUST_LOG`; falls back to `Info`, or `Debug` when `debug` is set.
pub fn init(debug: bool) {
    let default_level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .try_init();
}
