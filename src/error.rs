//! Error types for the bot telemetry agent.

use thiserror::Error;

/// Errors raised while loading or compiling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid path exclusion `{pattern}`: {source}")]
    InvalidExclusion {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid override rule: {0}")]
    InvalidRule(#[from] RuleParseError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors raised while parsing a `kind:value` override rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("unknown rule kind in `{0}`")]
    UnknownKind(String),

    #[error("rule `{0}` has no value")]
    MissingValue(String),

    #[error("rule `{0}` must have the form `subcategory:<category>:<name>`")]
    MalformedSubcategory(String),
}

/// Errors raised by a ruleset sync.
///
/// Cloneable because a single sync result is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no ruleset source configured")]
    NoSource,

    #[error("ruleset request failed: {0}")]
    Transport(String),

    #[error("ruleset endpoint returned status {0}")]
    Status(u16),

    #[error("failed to decode ruleset: {0}")]
    Decode(String),

    #[error("ruleset sync task aborted: {0}")]
    Aborted(String),
}

/// Errors raised while delivering a telemetry event.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("telemetry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector returned status {0}")]
    Status(u16),

    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
}

/// Error raised by a detector that could not classify a request.
#[derive(Debug, Error)]
#[error("detector `{detector}` failed: {message}")]
pub struct DetectError {
    pub detector: &'static str,
    pub message: String,
}

impl DetectError {
    pub fn new(detector: &'static str, message: impl Into<String>) -> Self {
        Self {
            detector,
            message: message.into(),
        }
    }
}
