//! # Logging & Tracing Infrastructure
//!
//! Installs the process-wide `tracing` subscriber used by every crate in the
//! workspace.
//!
//! ## Overview
//!
//! - Three output formats: pretty for a terminal, compact for daemons and
//!   JSON for log shippers.
//! - A default filter that keeps the sync crates at the requested level and
//!   pushes transport and database chatter down to `warn`.
//! - Credential redaction. Fields named like `cookie`, `session` or `token`
//!   are printed as `[REDACTED]` by the text formatters. The JSON formatter
//!   writes values verbatim, so call sites logging remote URLs or cookies go
//!   through [`redact_url`] / [`redact_if_sensitive`].
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::time::LogLevel;
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug),
//! )?;
//!
//! tracing::info!(book_id = 42, "Sync requested");
//! ```

use crate::error::{CoreError, Result};

use bridge_traits::time::LogLevel;

use std::borrow::Cow;
use std::fmt;

use tracing::field::Field;
use tracing_subscriber::{
    field::MakeExt,
    filter::EnvFilter,
    fmt::format::{debug_fn, FmtSpan, Writer},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    Layer,
};

/// Substrings marking a field as credential material
const SENSITIVE_FIELDS: &[&str] = &[
    "cookie",
    "session",
    "token",
    "csrf",
    "authorization",
    "password",
    "secret",
];

/// Workspace crates that follow the configured level
const WORKSPACE_TARGETS: &[&str] = &[
    "doc_sync_workspace",
    "core_runtime",
    "core_sync",
    "core_library",
    "core_service",
    "provider_yuque",
    "bridge_desktop",
];

/// Dependencies capped at `warn` by the default filter
const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls", "sqlx"];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One JSON object per event
    Json,
    /// Single-line text
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Mask credential-looking fields in text output
    pub redact_sensitive: bool,
    /// Full `EnvFilter` directive string; replaces the default filter
    pub filter: Option<String>,
    /// Log span open/close (text) or span context (JSON)
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            redact_sensitive: true,
            filter: None,
            enable_spans: false,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact_sensitive = redact;
        self
    }

    /// e.g. `"core_sync=trace,provider_yuque=debug"`
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// # Errors
///
/// - `CoreError::Config` when the filter string does not parse
/// - `CoreError::Logging` when a global subscriber is already installed
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(filter)
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

fn output_layer(config: &LoggingConfig) -> BoxedLayer {
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(std::io::stderr);

    match (config.format, config.redact_sensitive) {
        (LogFormat::Json, _) => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(false)
            .boxed(),
        (LogFormat::Pretty, true) => base
            .pretty()
            .with_span_events(span_events)
            .fmt_fields(debug_fn(write_field).delimited(", "))
            .boxed(),
        (LogFormat::Pretty, false) => base.pretty().with_span_events(span_events).boxed(),
        (LogFormat::Compact, true) => base
            .compact()
            .with_span_events(span_events)
            .fmt_fields(debug_fn(write_field).delimited(" "))
            .boxed(),
        (LogFormat::Compact, false) => base.compact().with_span_events(span_events).boxed(),
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => default_directives(config.level),
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| CoreError::Config(format!("Invalid log filter '{}': {}", directives, e)))
}

fn default_directives(level: LogLevel) -> String {
    let level = level.as_str();
    WORKSPACE_TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .chain(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)))
        .collect::<Vec<_>>()
        .join(",")
}

fn write_field(writer: &mut Writer<'_>, field: &Field, value: &dyn fmt::Debug) -> fmt::Result {
    match field.name() {
        "message" => write!(writer, "{:?}", value),
        name if is_sensitive_field(name) => write!(writer, "{}={}", name, REDACTED),
        name => write!(writer, "{}={:?}", name, value),
    }
}

/// `cookie`, `session_cookie` and `csrfToken` are sensitive; identifiers
/// such as `session_id` are not.
fn is_sensitive_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    !name.ends_with("_id") && SENSITIVE_FIELDS.iter().any(|marker| name.contains(marker))
}

/// Value to log for `field_name`: the value itself, or `[REDACTED]`.
///
/// ```ignore
/// debug!(cookie = %redact_if_sensitive("cookie", &credential.cookie), "Attaching session");
/// ```
pub fn redact_if_sensitive<'a>(field_name: &str, value: &'a str) -> Cow<'a, str> {
    if is_sensitive_field(field_name) {
        Cow::Borrowed(REDACTED)
    } else {
        Cow::Borrowed(value)
    }
}

/// Drop the query string and fragment of a remote URL.
///
/// Signed CDN and attachment links carry their access token in the query.
pub fn redact_url(url: &str) -> Cow<'_, str> {
    match url.find(['?', '#']) {
        Some(end) => Cow::Owned(format!("{}?{}", &url[..end], REDACTED)),
        None => Cow::Borrowed(url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Debug)
            .with_redaction(false)
            .with_filter("core_sync=trace")
            .with_spans(true)
            .with_thread_info(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Debug);
        assert!(!config.redact_sensitive);
        assert_eq!(config.filter.as_deref(), Some("core_sync=trace"));
        assert!(config.enable_spans);
        assert!(config.display_target);
        assert!(config.display_thread_info);
    }

    #[test]
    fn test_default_directives_cover_workspace_and_dependencies() {
        let directives = default_directives(LogLevel::Debug);

        assert!(directives.contains("core_sync=debug"));
        assert!(directives.contains("provider_yuque=debug"));
        assert!(directives.contains("sqlx=warn"));
        assert!(directives.contains("reqwest=warn"));
        assert!(!directives.contains("core_sync=warn"));
    }

    #[test]
    fn test_custom_filter_replaces_default() {
        let config = LoggingConfig::default().with_filter("core_sync=trace,provider_yuque=debug");
        let filter = build_filter(&config).unwrap().to_string();

        assert!(filter.contains("core_sync=trace"));
        assert!(!filter.contains("sqlx"));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig::default().with_filter("core_sync=loudest");
        assert!(matches!(build_filter(&config), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_sensitive_field_names() {
        assert!(is_sensitive_field("cookie"));
        assert!(is_sensitive_field("Session"));
        assert!(is_sensitive_field("csrfToken"));
        assert!(!is_sensitive_field("session_id"));
        assert!(!is_sensitive_field("doc_id"));
        assert!(!is_sensitive_field("title"));
    }

    #[test]
    fn test_redact_if_sensitive() {
        assert_eq!(redact_if_sensitive("cookie", "_yuque_session=abc"), REDACTED);
        assert_eq!(redact_if_sensitive("title", "Getting Started"), "Getting Started");
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://cdn.nlark.com/a.png?x-oss-signature=abc"),
            "https://cdn.nlark.com/a.png?[REDACTED]"
        );
        assert_eq!(
            redact_url("https://www.yuque.com/attachments/a.pdf#page=2"),
            "https://www.yuque.com/attachments/a.pdf?[REDACTED]"
        );
        assert_eq!(
            redact_url("https://cdn.nlark.com/a.png"),
            "https://cdn.nlark.com/a.png"
        );
    }
}
