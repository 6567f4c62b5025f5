//! Structured logging setup
//!
//! The hosting platform collects stdout, so the worker logs JSON unless told
//! otherwise. Operators running it by hand usually want `compact`.
//!
//! | Variable     | Values                           | Default |
//! |--------------|----------------------------------|---------|
//! | `LOG_LEVEL`  | error, warn, info, debug, trace  | info    |
//! | `LOG_FORMAT` | json, pretty, compact            | json    |
//! | `LOG_SPANS`  | true, false                      | false   |
//! | `RUST_LOG`   | full filter directive            | unset   |
//!
//! `RUST_LOG` replaces the level and the quieted dependency targets entirely.

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Dependency targets kept at warn unless `RUST_LOG` says otherwise
const QUIET_TARGETS: [&str; 4] = ["hyper", "reqwest", "warp", "tokio"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a log level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    s.trim().parse().unwrap_or(Level::INFO)
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    /// Emit span open/close events
    pub spans: bool,
    /// Raw `RUST_LOG` directive, overriding `level`
    pub directive: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            spans: false,
            directive: None,
        }
    }
}

impl LogSettings {
    /// Read the settings through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            level: lookup("LOG_LEVEL").map_or(Level::INFO, |v| parse_level(&v)),
            format: lookup("LOG_FORMAT").map_or_else(LogFormat::default, |v| LogFormat::parse(&v)),
            spans: lookup("LOG_SPANS").is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            directive: lookup("RUST_LOG").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Terminal settings used by the `-v` flags
    pub fn verbose(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::Compact,
            spans: level == Level::TRACE,
            directive: env::var("RUST_LOG").ok(),
        }
    }

    fn filter_directive(&self) -> String {
        if let Some(directive) = &self.directive {
            return directive.clone();
        }
        let mut directive = self.level.to_string().to_ascii_lowercase();
        for target in QUIET_TARGETS {
            directive.push_str(&format!(",{target}=warn"));
        }
        directive
    }

    fn span_events(&self) -> FmtSpan {
        if self.spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer().with_span_events(self.span_events());
        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Pretty => layer.pretty().with_ansi(true).boxed(),
            LogFormat::Compact => layer.compact().with_ansi(true).with_target(false).boxed(),
        }
    }
}

/// Install the global subscriber
pub fn init_logging(settings: &LogSettings) {
    tracing_subscriber::registry()
        .with(settings.fmt_layer())
        .with(EnvFilter::new(settings.filter_directive()))
        .init();
}

/// Install the global subscriber configured from the environment
pub fn init_default_logging() {
    init_logging(&LogSettings::from_env());
}

/// Span around the processing of one polled task
#[macro_export]
macro_rules! task_span {
    ($($field:tt)*) => {
        tracing::info_span!("task_processing", $($field)*)
    };
}

/// Span around one registration reconcile pass
#[macro_export]
macro_rules! registration_span {
    ($($field:tt)*) => {
        tracing::info_span!("registration", $($field)*)
    };
}

/// Span around service lifecycle events
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, registration_span, task_span};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        assert_eq!(settings(&[]), LogSettings::default());
    }

    #[test]
    fn test_format_names_are_case_insensitive() {
        assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse(" PRETTY "), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn test_environment_is_applied() {
        let settings = settings(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "compact"),
            ("LOG_SPANS", "TRUE"),
        ]);

        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(settings.spans);
        assert_eq!(settings.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_filter_quiets_dependencies() {
        let directive = settings(&[("LOG_LEVEL", "trace")]).filter_directive();
        assert_eq!(
            directive,
            "trace,hyper=warn,reqwest=warn,warp=warn,tokio=warn"
        );
    }

    #[test]
    fn test_rust_log_replaces_filter() {
        let settings = settings(&[("LOG_LEVEL", "trace"), ("RUST_LOG", "offload_worker=debug")]);
        assert_eq!(settings.filter_directive(), "offload_worker=debug");
    }

    #[test]
    fn test_span_macros_build_spans() {
        let span = task_span!(task_id = 7_i64);
        let _entered = span.enter();
        let _registration = registration_span!(enabled = true);
    }
}
