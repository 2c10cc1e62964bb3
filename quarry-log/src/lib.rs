//! Quarry logging
//!
//! Leveled, structured logging for the quarry search client. Every record
//! carries a target (the emitting module by default), a message, and an
//! optional list of key-value fields such as the endpoint or index a call
//! went to.
//!
//! # Usage
//!
//! ```rust
//! use quarry_log::{debug, info, warn};
//!
//! info!("router ready");
//!
//! let endpoint = "primary";
//! let index = "car_orders";
//! debug!(endpoint = endpoint, index = index; "sending search");
//! warn!(target: "quarry::scroll", "snapshot released early");
//! ```
//!
//! # Environment Variables
//!
//! - `QUARRY_DEBUG=1` - Enable debug logging
//! - `QUARRY_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `QUARRY_LOG_FORMAT=pretty|compact|json|facade` - Output format
//! - `QUARRY_LOG_TIMESTAMPS=1|0` - Include timestamps in text formats

use once_cell::sync::Lazy;
use std::env;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Levels and formats
// ============================================================================

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Wire-level detail
    Trace = 0,
    /// Per-call detail
    Debug = 1,
    /// Lifecycle events
    Info = 2,
    /// Rejected or degraded calls
    Warn = 3,
    /// Failures the caller must act on
    Error = 4,
    /// Logging disabled
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Upper-case level name.
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

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    fn to_facade(self) -> Option<log::Level> {
        match self {
            Level::Trace => Some(log::Level::Trace),
            Level::Debug => Some(log::Level::Debug),
            Level::Info => Some(log::Level::Info),
            Level::Warn => Some(log::Level::Warn),
            Level::Error => Some(log::Level::Error),
            Level::Off => None,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-column text on stderr
    Pretty,
    /// Single-letter level, short time, on stderr
    Compact,
    /// One JSON object per line on stderr
    Json,
    /// Forward to the `log` crate facade
    Facade,
}

impl Format {
    /// Parse a format name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            "facade" | "log" => Some(Format::Facade),
            _ => None,
        }
    }
}

// ============================================================================
// Global configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static CONFIG: Lazy<LogConfig> = Lazy::new(|| {
    let config = LogConfig::from_env();
    DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
    LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
    config
});

/// Logging configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Debug records are emitted regardless of level
    pub debug: bool,
    /// Minimum level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Prefix text records with a timestamp
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Build a config from `QUARRY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |value: String| value == "1" || value.eq_ignore_ascii_case("true");

        let debug = lookup("QUARRY_DEBUG").map(flag).unwrap_or(false);

        let level = lookup("QUARRY_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("QUARRY_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let timestamps = lookup("QUARRY_LOG_TIMESTAMPS").map(flag).unwrap_or(true);

        Self {
            debug,
            level,
            format,
            timestamps,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Force the environment to be read now instead of on the first record.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Whether debug records are forced on.
#[inline]
pub fn is_debug_enabled() -> bool {
    Lazy::force(&CONFIG);
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Whether records at `level` are emitted.
#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    Lazy::force(&CONFIG);
    if level == Level::Debug && DEBUG_ENABLED.load(Ordering::Relaxed) {
        return true;
    }
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Current minimum level.
pub fn current_level() -> Level {
    Lazy::force(&CONFIG);
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    Lazy::force(&CONFIG);
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Force debug records on or off at runtime.
pub fn set_debug(enabled: bool) {
    Lazy::force(&CONFIG);
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
}

/// The configuration read from the environment.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

// ============================================================================
// Records
// ============================================================================

/// A single structured log record.
#[derive(Debug)]
pub struct Record<'a> {
    /// Severity
    pub level: Level,
    /// Emitting module or explicit target
    pub target: &'a str,
    /// Rendered message
    pub message: &'a str,
    /// Structured fields, in call-site order
    pub fields: &'a [(&'static str, String)],
}

impl Record<'_> {
    /// Message followed by `key=value` pairs.
    pub fn render_text(&self) -> String {
        let mut out = String::from(self.message);
        for (key, value) in self.fields {
            let _ = write!(out, " {}={}", key, value);
        }
        out
    }
}

/// Emit a record. Used by the macros.
#[doc(hidden)]
pub fn emit(level: Level, target: &str, message: &str, fields: &[(&'static str, String)]) {
    if !is_level_enabled(level) {
        return;
    }

    let record = Record {
        level,
        target,
        message,
        fields,
    };
    let config = config();

    match config.format {
        Format::Pretty => write_pretty(&record, config),
        Format::Compact => write_compact(&record, config),
        Format::Json => write_json(&record),
        Format::Facade => write_facade(&record),
    }
}

fn write_pretty(record: &Record<'_>, config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
    }

    let _ = write!(stderr, "{:5} ", record.level.as_str());

    if !record.target.is_empty() {
        let _ = write!(stderr, "[{}] ", record.target);
    }

    let _ = writeln!(stderr, "{}", record.render_text());
}

fn write_compact(record: &Record<'_>, config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%H:%M:%S"));
    }

    let initial = record.level.as_str().chars().next().unwrap_or('?');
    let _ = writeln!(stderr, "{} {}: {}", initial, record.target, record.render_text());
}

fn write_facade(record: &Record<'_>) {
    if let Some(level) = record.level.to_facade() {
        log::log!(target: record.target, level, "{}", record.render_text());
    }
}

#[cfg(feature = "json")]
fn write_json(record: &Record<'_>) {
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct JsonLine<'a> {
        timestamp: String,
        level: &'a str,
        target: &'a str,
        message: &'a str,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<&'a str, &'a str>,
    }

    let line = JsonLine {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: record.level.as_str(),
        target: record.target,
        message: record.message,
        fields: record
            .fields
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect(),
    };

    if let Ok(json) = serde_json::to_string(&line) {
        eprintln!("{}", json);
    }
}

#[cfg(not(feature = "json"))]
fn write_json(record: &Record<'_>) {
    let mut fields = String::new();
    for (key, value) in record.fields {
        let _ = write!(fields, ",\"{}\":\"{}\"", escape_json(key), escape_json(value));
    }
    eprintln!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}"{}}}"#,
        chrono::Utc::now().to_rfc3339(),
        record.level.as_str(),
        escape_json(record.target),
        escape_json(record.message),
        fields
    );
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(escaped, "\\u{:04x}", c as u32);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

// ============================================================================
// Macros
// ============================================================================

/// Emit a record at an explicit level.
///
/// Accepts an optional `target: expr,` prefix and an optional
/// `key = value, ...;` field list before the format arguments.
#[macro_export]
macro_rules! event {
    ($level:expr, target: $target:expr, $($key:ident = $value:expr),+ ; $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::emit(
                $level,
                $target,
                &format!($($arg)+),
                &[$((stringify!($key), ($value).to_string())),+],
            );
        }
    };
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::emit($level, $target, &format!($($arg)+), &[]);
        }
    };
    ($level:expr, $($key:ident = $value:expr),+ ; $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::emit(
                $level,
                module_path!(),
                &format!($($arg)+),
                &[$((stringify!($key), ($value).to_string())),+],
            );
        }
    };
    ($level:expr, $($arg:tt)+) => {
        if $crate::is_level_enabled($level) {
            $crate::emit($level, module_path!(), &format!($($arg)+), &[]);
        }
    };
}

/// Log a trace record.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::event!($crate::Level::Trace, $($arg)+) };
}

/// Log a debug record.
///
/// Emitted when `QUARRY_DEBUG=1` or the level is `debug` or lower.
///
/// ```rust
/// use quarry_log::debug;
///
/// let took_ms = 12;
/// debug!("search finished in {}ms", took_ms);
/// debug!(endpoint = "secondary"; "scroll opened");
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::event!($crate::Level::Debug, $($arg)+) };
}

/// Log an info record.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::event!($crate::Level::Info, $($arg)+) };
}

/// Log a warning record.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::event!($crate::Level::Warn, $($arg)+) };
}

/// Log an error record.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::event!($crate::Level::Error, $($arg)+) };
}
