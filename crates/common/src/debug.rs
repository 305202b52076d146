//! Per-module diagnostic loggers.
//!
//! Control via DEBUG environment variable:
//! - `DEBUG=*` - Enable all loggers
//! - `DEBUG=visitor` - Enable only the visitor
//! - `DEBUG=visitor,host` - Enable multiple
//!
//! Verbosity via DEBUG_VERBOSITY (1-2, default 1). Level 2 adds per-step
//! detail such as path-resolution failures.

use std::collections::HashSet;
use std::env;
use std::sync::OnceLock;

// ============================================================================
// Configuration
// ============================================================================

enum EnabledModules {
    All,
    None,
    Named(HashSet<String>),
}

struct LogConfig {
    enabled: EnabledModules,
    verbosity: u8,
}

static CONFIG: OnceLock<LogConfig> = OnceLock::new();

fn config() -> &'static LogConfig {
    CONFIG.get_or_init(|| {
        let enabled = match env::var("DEBUG").ok().as_deref() {
            None | Some("") => EnabledModules::None,
            Some("*") | Some("1") | Some("true") => EnabledModules::All,
            Some(value) => {
                let set: HashSet<_> = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if set.is_empty() {
                    EnabledModules::None
                } else {
                    EnabledModules::Named(set)
                }
            }
        };
        let verbosity = env::var("DEBUG_VERBOSITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(|v: u8| v.clamp(1, 2))
            .unwrap_or(1);
        LogConfig { enabled, verbosity }
    })
}

fn is_enabled(name: &str) -> bool {
    match &config().enabled {
        EnabledModules::None => false,
        EnabledModules::All => true,
        EnabledModules::Named(set) => set.contains(name),
    }
}

// ============================================================================
// Logger
// ============================================================================

pub struct Logger {
    name: &'static str,
    enabled: bool,
}

impl Logger {
    pub const fn disabled() -> Self {
        Self {
            name: "",
            enabled: false,
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn log(&self, msg: &str) {
        if self.enabled {
            eprintln!("[{}] {}", self.name, msg);
        }
    }

    #[inline]
    pub fn detail(&self, msg: &str) {
        if self.enabled && config().verbosity >= 2 {
            eprintln!("[{}] {}", self.name, msg);
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Create a logger. The name must be a static string.
pub fn create_logger(name: &'static str) -> Logger {
    if is_enabled(name) {
        Logger {
            name,
            enabled: true,
        }
    } else {
        Logger::disabled()
    }
}

// ============================================================================
// Macros - avoid format! cost when disabled
// ============================================================================

#[macro_export]
macro_rules! log {
    ($logger:expr, $($arg:tt)*) => {
        if $logger.enabled() {
            $logger.log(&format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_detail {
    ($logger:expr, $($arg:tt)*) => {
        if $logger.enabled() {
            $logger.detail(&format!($($arg)*));
        }
    };
}
