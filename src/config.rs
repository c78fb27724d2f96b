//! Configuration types for the bot telemetry agent.

use crate::error::ConfigError;
use crate::paths::PathExclusion;
use crate::rules::OverrideSettings;
use crate::ruleset::Ruleset;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default telemetry collector.
pub const DEFAULT_COLLECT_ENDPOINT: &str = "https://www.spyglasses.io/api/collect";

/// Default ruleset endpoint.
pub const DEFAULT_PATTERNS_ENDPOINT: &str = "https://www.spyglasses.io/api/patterns";

/// Main configuration for the bot telemetry agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotTelemetryConfig {
    /// API key for the ruleset and collector endpoints.
    /// Without one, no sync or telemetry happens.
    pub api_key: Option<String>,

    /// Log sync and delivery failures
    pub debug: bool,

    /// Telemetry collector URL
    pub collect_endpoint: String,

    /// Ruleset URL
    pub patterns_endpoint: String,

    /// Platform identifier sent with every event
    pub platform_type: String,

    /// Block crawlers that collect content for AI model training
    pub block_ai_model_trainers: bool,

    /// Block rules (`pattern:`, `category:`, `subcategory:`)
    pub custom_blocks: Vec<String>,

    /// Allow rules; these override block rules
    pub custom_allows: Vec<String>,

    /// Paths to skip in addition to the built-in exclusions
    pub exclude_paths: Vec<PathExclusionConfig>,

    /// Telemetry delivery settings
    pub logging: LoggingConfig,

    /// Seconds a synced ruleset stays fresh
    pub cache_ttl_seconds: u64,

    /// Timeout for ruleset and collector requests
    pub request_timeout_ms: u64,

    /// Pre-supplied ruleset; disables syncing when set
    pub ruleset: Option<Ruleset>,
}

impl Default for BotTelemetryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            debug: false,
            collect_endpoint: DEFAULT_COLLECT_ENDPOINT.to_string(),
            patterns_endpoint: DEFAULT_PATTERNS_ENDPOINT.to_string(),
            platform_type: "rust".to_string(),
            block_ai_model_trainers: false,
            custom_blocks: vec![],
            custom_allows: vec![],
            exclude_paths: vec![],
            logging: LoggingConfig::default(),
            cache_ttl_seconds: 24 * 60 * 60,
            request_timeout_ms: 5000,
            ruleset: None,
        }
    }
}

impl BotTelemetryConfig {
    /// Load configuration from a JSON or YAML file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    /// The API key, if one is set and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse override rules and compile path exclusions.
    pub fn compile(&self) -> Result<CompiledSettings, ConfigError> {
        let overrides = OverrideSettings::parse(
            self.block_ai_model_trainers,
            &self.custom_blocks,
            &self.custom_allows,
        )?;

        let exclusions = self
            .exclude_paths
            .iter()
            .map(PathExclusionConfig::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledSettings {
            overrides,
            exclusions,
            blocked_reporting: self.logging.blocked_reporting(),
        })
    }
}

/// A path exclusion as written in configuration.
///
/// A plain string is a substring match; `{ "regex": "..." }` is a regex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathExclusionConfig {
    Substring(String),
    Regex { regex: String },
}

impl PathExclusionConfig {
    pub fn compile(&self) -> Result<PathExclusion, ConfigError> {
        match self {
            PathExclusionConfig::Substring(s) => Ok(PathExclusion::Substring(s.clone())),
            PathExclusionConfig::Regex { regex } => Regex::new(regex)
                .map(PathExclusion::Regex)
                .map_err(|source| ConfigError::InvalidExclusion {
                    pattern: regex.clone(),
                    source,
                }),
        }
    }
}

/// Telemetry delivery settings for blocked requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Milliseconds to wait for a blocked visit to be reported.
    /// `0` waits until delivery settles; `null` never reports blocked visits.
    pub blocking_timeout_ms: Option<u64>,

    /// Wait for blocked-visit delivery before responding
    pub await_blocked_logging: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            blocking_timeout_ms: Some(2000),
            await_blocked_logging: true,
        }
    }
}

impl LoggingConfig {
    pub fn blocked_reporting(&self) -> BlockedReporting {
        match (self.blocking_timeout_ms, self.await_blocked_logging) {
            (None, _) => BlockedReporting::Skip,
            (Some(_), false) => BlockedReporting::Detached,
            (Some(0), true) => BlockedReporting::Wait(None),
            (Some(ms), true) => BlockedReporting::Wait(Some(Duration::from_millis(ms))),
        }
    }
}

/// How a blocked visit is reported before the 403 goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReporting {
    /// Do not report blocked visits
    Skip,
    /// Report without waiting
    Detached,
    /// Wait for delivery, up to the bound if one is set
    Wait(Option<Duration>),
}

/// Settings compiled once when the agent is built.
#[derive(Debug, Clone)]
pub struct CompiledSettings {
    pub overrides: OverrideSettings,
    pub exclusions: Vec<PathExclusion>,
    pub blocked_reporting: BlockedReporting,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BotTelemetryConfig::default();
        assert!(config.api_key().is_none());
        assert!(!config.debug);
        assert!(!config.block_ai_model_trainers);
        assert_eq!(config.collect_endpoint, DEFAULT_COLLECT_ENDPOINT);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86400));
        assert_eq!(
            config.logging.blocked_reporting(),
            BlockedReporting::Wait(Some(Duration::from_millis(2000)))
        );
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let config = BotTelemetryConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "api_key": "key",
            "block_ai_model_trainers": true,
            "custom_blocks": ["category:AI Crawler"],
            "custom_allows": ["pattern:Claude-User\\/[0-9]"],
            "exclude_paths": ["/admin", {"regex": "^/private/"}],
            "logging": {"blocking_timeout_ms": null}
        }"#;

        let config: BotTelemetryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.api_key(), Some("key"));
        assert_eq!(config.exclude_paths.len(), 2);
        assert_eq!(config.logging.blocked_reporting(), BlockedReporting::Skip);

        let compiled = config.compile().unwrap();
        assert!(compiled.overrides.block_ai_model_trainers);
        assert_eq!(compiled.overrides.custom_allows.len(), 1);
        assert!(compiled.exclusions[0].matches("/admin/users"));
        assert!(compiled.exclusions[1].matches("/private/x"));
    }

    #[test]
    fn test_config_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "api_key: from-yaml\nexclude_paths:\n  - /health\nlogging:\n  await_blocked_logging: false\n"
        )
        .unwrap();

        let config = BotTelemetryConfig::from_file(file.path()).unwrap();
        assert_eq!(config.api_key(), Some("from-yaml"));
        assert_eq!(
            config.exclude_paths,
            vec![PathExclusionConfig::Substring("/health".to_string())]
        );
        assert_eq!(config.logging.blocked_reporting(), BlockedReporting::Detached);
    }

    #[test]
    fn test_blocked_reporting_policies() {
        let wait_forever = LoggingConfig {
            blocking_timeout_ms: Some(0),
            await_blocked_logging: true,
        };
        assert_eq!(wait_forever.blocked_reporting(), BlockedReporting::Wait(None));
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let config = BotTelemetryConfig {
            custom_blocks: vec!["type:Search Crawler".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.compile(), Err(ConfigError::InvalidRule(_))));
    }

    #[test]
    fn test_invalid_exclusion_regex_is_rejected() {
        let config = BotTelemetryConfig {
            exclude_paths: vec![PathExclusionConfig::Regex {
                regex: "(".to_string(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.compile(),
            Err(ConfigError::InvalidExclusion { .. })
        ));
    }
}
