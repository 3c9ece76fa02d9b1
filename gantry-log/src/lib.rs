//! Diagnostic logging for code that runs before a subscriber exists.
//!
//! Configuration loading happens before the application installs its
//! `tracing` subscriber, so it reports through these lightweight macros
//! instead. Everything is controlled from the environment:
//!
//! - `GANTRY_DEBUG=1` - enable debug output
//! - `GANTRY_LOG_LEVEL=trace|debug|info|warn|error|off` - minimum level
//! - `GANTRY_LOG_FORMAT=json|pretty|compact` - output format (default json)
//! - `GANTRY_LOG_COLOR=1|0` - colored level names in pretty output
//!
//! ```rust
//! use gantry_log::{debug, info};
//!
//! info!("Loading configuration from {}", "gantry.toml");
//! debug!(target: "gantry::config", "Applied {} overrides", 3);
//! ```
//!
//! Output goes to STDERR so it never interleaves with a JSON log stream on
//! STDOUT.

use once_cell::sync::Lazy;
use std::env;
use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Severity, ordered from most to least verbose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Off = 5,
}

impl Level {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    #[cfg(feature = "color")]
    fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => self.as_str().magenta(),
            Level::Debug => self.as_str().blue(),
            Level::Info => self.as_str().green(),
            Level::Warn => self.as_str().yellow(),
            Level::Error => self.as_str().red().bold(),
            Level::Off => self.as_str().white(),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Pretty,
    Compact,
}

impl Format {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            _ => None,
        }
    }
}

/// Environment-derived settings, read once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub debug: bool,
    pub level: Level,
    pub format: Format,
    pub color: bool,
    pub timestamps: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl Settings {
    /// Build settings from a variable lookup
    ///
    /// Separate from the process environment so tests need not mutate it.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debug = lookup("GANTRY_DEBUG").map(|v| flag(&v)).unwrap_or(false);
        let level = lookup("GANTRY_LOG_LEVEL")
            .and_then(|v| Level::from_str(&v))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });
        let format = lookup("GANTRY_LOG_FORMAT")
            .and_then(|v| Format::from_str(&v))
            .unwrap_or(Format::Json);
        let color = lookup("GANTRY_LOG_COLOR")
            .map(|v| flag(&v))
            .unwrap_or_else(|| lookup("NO_COLOR").is_none() && std::io::stderr().is_terminal());
        let timestamps = lookup("GANTRY_LOG_TIMESTAMPS")
            .map(|v| flag(&v))
            .unwrap_or(true);

        Self {
            debug,
            level,
            format,
            color,
            timestamps,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static SETTINGS: Lazy<Settings> = Lazy::new(|| {
    let settings = Settings::from_env();
    DEBUG_ENABLED.store(settings.debug, Ordering::SeqCst);
    LOG_LEVEL.store(settings.level as u8, Ordering::SeqCst);
    settings
});

/// Read the environment now instead of on first use
pub fn init() {
    Lazy::force(&SETTINGS);
}

pub fn settings() -> &'static Settings {
    &SETTINGS
}

#[inline]
pub fn is_debug_enabled() -> bool {
    init();
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    init();
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn current_level() -> Level {
    init();
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the level at runtime
pub fn set_level(level: Level) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn set_debug(enabled: bool) {
    init();
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    if !is_level_enabled(level) {
        return;
    }
    let line = render(settings(), level, target, message);
    let _ = writeln!(std::io::stderr().lock(), "{}", line);
}

fn render(settings: &Settings, level: Level, target: &str, message: &str) -> String {
    match settings.format {
        Format::Json => render_json(level, target, message),
        Format::Pretty => {
            let mut line = String::new();
            if settings.timestamps {
                line.push_str(&chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
            }
            line.push_str(&level_label(settings, level));
            if !target.is_empty() {
                line.push_str(&format!(" [{}]", target));
            }
            line.push(' ');
            line.push_str(message);
            line
        }
        Format::Compact => {
            let stamp = if settings.timestamps {
                chrono::Local::now().format("%H:%M:%S ").to_string()
            } else {
                String::new()
            };
            let initial = level.as_str().chars().next().unwrap_or('?');
            format!("{}{} {}: {}", stamp, initial, target, message)
        }
    }
}

#[cfg(feature = "color")]
fn level_label(settings: &Settings, level: Level) -> String {
    if settings.color {
        format!("{:5}", level.colored())
    } else {
        format!("{:5}", level.as_str())
    }
}

#[cfg(not(feature = "color"))]
fn level_label(_settings: &Settings, level: Level) -> String {
    format!("{:5}", level.as_str())
}

#[cfg(feature = "json")]
fn render_json(level: Level, target: &str, message: &str) -> String {
    #[derive(serde::Serialize)]
    struct Entry<'a> {
        timestamp: String,
        level: &'a str,
        target: &'a str,
        message: &'a str,
    }

    serde_json::to_string(&Entry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level.as_str(),
        target,
        message,
    })
    .unwrap_or_default()
}

#[cfg(not(feature = "json"))]
fn render_json(level: Level, target: &str, message: &str) -> String {
    fn escape(s: &str) -> String {
        s.chars()
            .flat_map(|c| match c {
                '"' => "\\\"".chars().collect::<Vec<_>>(),
                '\\' => "\\\\".chars().collect(),
                '\n' => "\\n".chars().collect(),
                c if c.is_control() => format!("\\u{:04x}", c as u32).chars().collect(),
                c => vec![c],
            })
            .collect()
    }
    format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}"}}"#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        escape(target),
        escape(message)
    )
}

/// Log at TRACE
#[macro_export]
macro_rules! trace {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($crate::Level::Trace) {
            $crate::log($crate::Level::Trace, $target, &format!($($arg)+));
        }
    };
    ($($arg:tt)+) => {
        $crate::trace!(target: module_path!(), $($arg)+)
    };
}

/// Log at DEBUG; also enabled by `GANTRY_DEBUG=1`
#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::is_debug_enabled() || $crate::is_level_enabled($crate::Level::Debug) {
            $crate::log($crate::Level::Debug, $target, &format!($($arg)+));
        }
    };
    ($($arg:tt)+) => {
        $crate::debug!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($crate::Level::Info) {
            $crate::log($crate::Level::Info, $target, &format!($($arg)+));
        }
    };
    ($($arg:tt)+) => {
        $crate::info!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($crate::Level::Warn) {
            $crate::log($crate::Level::Warn, $target, &format!($($arg)+));
        }
    };
    ($($arg:tt)+) => {
        $crate::warn!(target: module_path!(), $($arg)+)
    };
}

#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($crate::Level::Error) {
            $crate::log($crate::Level::Error, $target, &format!($($arg)+));
        }
    };
    ($($arg:tt)+) => {
        $crate::error!(target: module_path!(), $($arg)+)
    };
}
