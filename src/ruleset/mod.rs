//! Classification ruleset: bot patterns, AI referrers and property settings.
//!
//! A [`Ruleset`] is the wire form served by the patterns endpoint. It is
//! compiled into an [`ActiveRuleset`] before it becomes visible to requests.

pub mod cache;
pub mod source;

pub use cache::{RulesetCache, SyncStatus};
pub use source::{HttpRulesetSource, RulesetSource};

use crate::classification::{BotInfo, ReferrerInfo};
use crate::rules::OverrideSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

static BUILTIN_RULESET: &str = include_str!("../../data/default_ruleset.json");

static BUILTIN: LazyLock<Ruleset> = LazyLock::new(|| {
    serde_json::from_str(BUILTIN_RULESET).expect("valid builtin ruleset")
});

/// A bot user-agent pattern definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPattern {
    /// Regex source matched against the user-agent
    pub pattern: String,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub bot_type: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub company: Option<String>,
    #[serde(default)]
    pub is_compliant: bool,
    #[serde(default)]
    pub is_ai_model_trainer: bool,
    pub intent: Option<String>,
}

impl BotPattern {
    pub fn info(&self) -> BotInfo {
        BotInfo {
            bot_type: self.bot_type.clone(),
            category: self.category.clone(),
            subcategory: self.subcategory.clone(),
            company: self.company.clone(),
            is_compliant: self.is_compliant,
            is_ai_model_trainer: self.is_ai_model_trainer,
            intent: self.intent.clone(),
            url: self.url.clone(),
        }
    }
}

/// An AI assistant whose outbound links identify AI-referred visitors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReferrer {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub url: Option<String>,
    /// Substrings matched against the referrer
    #[serde(default)]
    pub patterns: Vec<String>,
    pub description: Option<String>,
}

impl AiReferrer {
    pub fn info(&self) -> ReferrerInfo {
        ReferrerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            company: self.company.clone(),
            url: self.url.clone(),
        }
    }
}

/// Block/allow settings configured for the property on the server side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertySettings {
    pub block_ai_model_trainers: bool,
    pub custom_blocks: Vec<String>,
    pub custom_allows: Vec<String>,
}

/// Versioned ruleset as served by the patterns endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ruleset {
    pub version: String,
    pub patterns: Vec<BotPattern>,
    pub ai_referrers: Vec<AiReferrer>,
    pub property_settings: PropertySettings,
}

impl Ruleset {
    /// The ruleset shipped with the agent.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }
}

/// Bot pattern with its compiled regex.
#[derive(Debug, Clone)]
pub struct CompiledBotPattern {
    pub regex: Regex,
    pub definition: BotPattern,
}

/// AI referrer with lowercased match patterns.
#[derive(Debug, Clone)]
pub struct CompiledReferrer {
    pub patterns: Vec<String>,
    pub definition: AiReferrer,
}

/// A ruleset ready for matching.
#[derive(Debug, Clone)]
pub struct ActiveRuleset {
    version: String,
    bots: Vec<CompiledBotPattern>,
    referrers: Vec<CompiledReferrer>,
    overrides: OverrideSettings,
}

impl ActiveRuleset {
    /// Compile a ruleset. Patterns that fail to compile are skipped.
    pub fn compile(ruleset: Ruleset) -> Self {
        let bots = ruleset
            .patterns
            .into_iter()
            .filter_map(|definition| {
                match Regex::new(&format!("(?i){}", definition.pattern)) {
                    Ok(regex) => Some(CompiledBotPattern { regex, definition }),
                    Err(e) => {
                        debug!(pattern = %definition.pattern, error = %e, "Skipping invalid bot pattern");
                        None
                    }
                }
            })
            .collect();

        let referrers = ruleset
            .ai_referrers
            .into_iter()
            .map(|definition| CompiledReferrer {
                patterns: definition
                    .patterns
                    .iter()
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_lowercase())
                    .collect(),
                definition,
            })
            .collect();

        let settings = &ruleset.property_settings;
        let overrides = OverrideSettings::parse_lenient(
            settings.block_ai_model_trainers,
            &settings.custom_blocks,
            &settings.custom_allows,
        );

        Self {
            version: ruleset.version,
            bots,
            referrers,
            overrides,
        }
    }

    /// The compiled builtin ruleset.
    pub fn builtin() -> Self {
        Self::compile(Ruleset::builtin())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bot_patterns(&self) -> &[CompiledBotPattern] {
        &self.bots
    }

    pub fn referrers(&self) -> &[CompiledReferrer] {
        &self.referrers
    }

    /// Override settings from the ruleset's property settings.
    pub fn overrides(&self) -> &OverrideSettings {
        &self.overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::OverrideRule;

    #[test]
    fn test_builtin_ruleset_loads() {
        let ruleset = Ruleset::builtin();
        assert_eq!(ruleset.version, "builtin");
        assert!(ruleset.patterns.iter().any(|p| p.pattern == "Googlebot"));
        assert!(ruleset.patterns.iter().any(|p| p.is_ai_model_trainer));
        assert!(!ruleset.ai_referrers.is_empty());

        let active = ActiveRuleset::builtin();
        assert_eq!(active.bot_patterns().len(), ruleset.patterns.len());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = r#"{
            "version": "42",
            "patterns": [{
                "pattern": "ExampleBot",
                "type": "examplebot",
                "category": "Scraper",
                "subcategory": "Content Scrapers",
                "isAiModelTrainer": true
            }],
            "aiReferrers": [{"id": "x", "name": "X", "patterns": ["x.ai"]}],
            "propertySettings": {"blockAiModelTrainers": true, "customBlocks": ["category:Scraper"]}
        }"#;

        let ruleset: Ruleset = serde_json::from_str(json).unwrap();
        assert_eq!(ruleset.version, "42");
        assert_eq!(ruleset.patterns[0].bot_type.as_deref(), Some("examplebot"));
        assert!(ruleset.patterns[0].is_ai_model_trainer);
        assert!(!ruleset.patterns[0].is_compliant);
        assert!(ruleset.property_settings.block_ai_model_trainers);
        assert!(ruleset.property_settings.custom_allows.is_empty());
    }

    #[test]
    fn test_compile_skips_invalid_patterns() {
        let ruleset = Ruleset {
            version: "1".to_string(),
            patterns: vec![
                BotPattern {
                    pattern: "Good".to_string(),
                    ..Default::default()
                },
                BotPattern {
                    pattern: "Broken(".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let active = ActiveRuleset::compile(ruleset);
        assert_eq!(active.bot_patterns().len(), 1);
        assert!(active.bot_patterns()[0].regex.is_match("a good bot"));
    }

    #[test]
    fn test_compile_parses_property_settings() {
        let ruleset = Ruleset {
            property_settings: PropertySettings {
                block_ai_model_trainers: true,
                custom_blocks: vec!["category:Scraper".to_string(), "nonsense".to_string()],
                custom_allows: vec!["pattern:Googlebot".to_string()],
            },
            ..Default::default()
        };

        let active = ActiveRuleset::compile(ruleset);
        let overrides = active.overrides();
        assert!(overrides.block_ai_model_trainers);
        assert_eq!(
            overrides.custom_blocks,
            vec![OverrideRule::Category("Scraper".to_string())]
        );
        assert_eq!(overrides.custom_allows.len(), 1);
    }
}
