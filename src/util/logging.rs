//! Structured logging setup for botbox
//!
//! Logging goes through the `tracing` ecosystem. Output is either pretty
//! console text (default) or JSON lines, always on stderr so that `plan`
//! output on stdout stays machine-readable.
//!
//! # Example
//!
//! ```no_run
//! use botbox::util::logging;
//!
//! logging::init_from_env();
//!
//! tracing::info!(stage = "ManifestCopy", "Copying dependency manifest");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

/// Crates whose debug output drowns the build log
const NOISY_TARGETS: &[&str] = &["bollard", "hyper", "hyper_util", "h2", "ignore"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level for botbox itself
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., botbox::backend::layout) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name in logs
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for CI logs
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// `production()` at `level` when JSON is wanted, plain console otherwise
    pub fn for_output(level: Level, use_json: bool) -> Self {
        if use_json {
            Self {
                level,
                ..Self::production()
            }
        } else {
            Self::with_level(level)
        }
    }
}

/// `BOTBOX_LOG_JSON` set to `1` or `true`
pub fn json_from_env() -> bool {
    env::var("BOTBOX_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Parses a log level from a string, falling back to INFO
///
/// ```
/// use botbox::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("loud"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(spec: &str) -> Option<Directive> {
    spec.parse().ok()
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();

    if env::var("RUST_LOG").is_err() {
        let defaults = std::iter::once(format!("botbox={}", level))
            .chain(NOISY_TARGETS.iter().map(|t| format!("{}=warn", t)));
        for spec in defaults {
            if let Some(d) = directive(&spec) {
                filter = filter.add_directive(d);
            }
        }
    }

    filter
}

/// Initializes the logging system; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `BOTBOX_LOG_LEVEL` and `BOTBOX_LOG_JSON`
///
/// `RUST_LOG`, when set, replaces the default filter entirely.
pub fn init_from_env() {
    init_logging(config_from_env());
}

fn config_from_env() -> LoggingConfig {
    let level = parse_level(&env::var("BOTBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    LoggingConfig::for_output(level, json_from_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("invalid"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_presets() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);

        let config = LoggingConfig::production();
        assert!(config.use_json);
        assert!(config.include_location);

        let config = LoggingConfig::with_level(Level::WARN);
        assert_eq!(config.level, Level::WARN);
        assert!(!config.use_json);
    }

    #[test]
    fn test_for_output() {
        let config = LoggingConfig::for_output(Level::DEBUG, true);
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
        assert!(config.include_thread_ids);

        let config = LoggingConfig::for_output(Level::ERROR, false);
        assert_eq!(config.level, Level::ERROR);
        assert!(!config.use_json);
        assert!(!config.include_location);
    }

    #[test]
    fn test_noisy_targets_parse_as_directives() {
        for target in NOISY_TARGETS {
            assert!(directive(&format!("{}=warn", target)).is_some());
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("BOTBOX_LOG_LEVEL", "debug");
        env::set_var("BOTBOX_LOG_JSON", "true");

        let config = config_from_env();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
        assert!(config.include_location);

        env::set_var("BOTBOX_LOG_JSON", "1");
        assert!(json_from_env());

        env::remove_var("BOTBOX_LOG_LEVEL");
        env::remove_var("BOTBOX_LOG_JSON");

        let config = config_from_env();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
    }
}
