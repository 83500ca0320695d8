//! Centralized logging configuration for the firmware core.
//!
//! Bus servicing runs in lock-step with the console CPU, so logging must cost
//! nothing when disabled: messages are built lazily through a closure and the
//! enabled check is a pair of relaxed atomic loads.
//!
//! # Usage
//!
//! ```rust
//! use vcart_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Loader, LogLevel::Info, || {
//!     format!("loaded image, {} bytes", 0x800)
//! });
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Log category for the firmware subsystems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Wire-level bus events (drives, suppressed drives)
    Bus,
    /// Attributed memory access
    Memory,
    /// I/O port dispatch and peripherals
    Ports,
    /// Image loading and the file cache
    Loader,
    /// Unimplemented features/stubs
    Stubs,
}

const CATEGORY_COUNT: usize = 5;

impl LogCategory {
    /// Parse a category name (case-insensitive)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bus" => Some(LogCategory::Bus),
            "memory" | "mem" => Some(LogCategory::Memory),
            "ports" | "port" => Some(LogCategory::Ports),
            "loader" => Some(LogCategory::Loader),
            "stubs" | "stub" => Some(LogCategory::Stubs),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            LogCategory::Bus => 0,
            LogCategory::Memory => 1,
            LogCategory::Ports => 2,
            LogCategory::Loader => 3,
            LogCategory::Stubs => 4,
        }
    }
}

/// Global logging configuration
///
/// A category with a specific level set uses it; a category left at `Off`
/// falls back to the global level.
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; CATEGORY_COUNT],
}

impl LogConfig {
    fn new() -> Self {
        const OFF: AtomicU8 = AtomicU8::new(LogLevel::Off as u8);
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: [OFF; CATEGORY_COUNT],
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    /// Set the global log level (applies to all categories unless overridden)
    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    /// Get the global log level
    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Set log level for a specific category
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    /// Get log level for a specific category
    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// Check if a message should be logged for the given category and level
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for slot in &self.category_levels {
            slot.store(LogLevel::Off as u8, Ordering::Relaxed);
        }
    }
}

/// Log a message with the specified category and level
///
/// The message is built lazily via a closure, so formatting only happens when
/// logging is actually enabled for the given category and level.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if config.should_log(category, level) {
        eprintln!("[{:?}] {}", category, message_fn());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("4"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("invalid"), None);
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Off < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(LogCategory::from_name("bus"), Some(LogCategory::Bus));
        assert_eq!(LogCategory::from_name("MEM"), Some(LogCategory::Memory));
        assert_eq!(LogCategory::from_name("loader"), Some(LogCategory::Loader));
        assert_eq!(LogCategory::from_name("nope"), None);
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Error);
        config.set_level(LogCategory::Ports, LogLevel::Debug);

        // Ports uses its specific level
        assert!(config.should_log(LogCategory::Ports, LogLevel::Debug));

        // Bus falls back to the global level
        assert!(!config.should_log(LogCategory::Bus, LogLevel::Warn));
        assert!(config.should_log(LogCategory::Bus, LogLevel::Error));
    }

    #[test]
    fn test_should_log_with_category_level() {
        let config = LogConfig::new();
        config.set_level(LogCategory::Loader, LogLevel::Info);

        assert!(config.should_log(LogCategory::Loader, LogLevel::Error));
        assert!(config.should_log(LogCategory::Loader, LogLevel::Info));
        assert!(!config.should_log(LogCategory::Loader, LogLevel::Debug));
        assert!(!config.should_log(LogCategory::Loader, LogLevel::Trace));
    }

    #[test]
    fn test_reset() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        config.set_level(LogCategory::Memory, LogLevel::Info);

        config.reset();

        assert_eq!(config.get_global_level(), LogLevel::Off);
        assert_eq!(config.get_level(LogCategory::Memory), LogLevel::Off);
    }
}
