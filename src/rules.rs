//! Block/allow override rules and the admit/deny decision.
//!
//! Rules are configured as `kind:value` strings and parsed once when the
//! agent is built:
//!
//! - `pattern:<source>` matches the exact source of the bot pattern that fired
//! - `category:<name>` matches the bot's category
//! - `subcategory:<category>:<name>` matches a subcategory within a category
//!
//! Allow rules always win over block rules, independent of list order.

use crate::classification::{Classification, SourceType};
use crate::error::RuleParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// A single block or allow directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OverrideRule {
    Pattern(String),
    Category(String),
    Subcategory { category: String, subcategory: String },
}

impl OverrideRule {
    /// Check whether this rule applies to a classification.
    pub fn matches(&self, classification: &Classification) -> bool {
        match self {
            OverrideRule::Pattern(pattern) => {
                classification.matched_pattern.as_deref() == Some(pattern.as_str())
            }
            OverrideRule::Category(category) => classification
                .bot_info()
                .is_some_and(|info| info.category == *category),
            OverrideRule::Subcategory {
                category,
                subcategory,
            } => classification
                .bot_info()
                .is_some_and(|info| info.category == *category && info.subcategory == *subcategory),
        }
    }
}

impl FromStr for OverrideRule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| RuleParseError::UnknownKind(s.to_string()))?;

        let value = value.trim();
        if value.is_empty() {
            return Err(RuleParseError::MissingValue(s.to_string()));
        }

        match kind.trim() {
            "pattern" => Ok(OverrideRule::Pattern(value.to_string())),
            "category" => Ok(OverrideRule::Category(value.to_string())),
            "subcategory" => match value
                .split_once(':')
                .map(|(category, subcategory)| (category.trim(), subcategory.trim()))
            {
                Some((category, subcategory)) if !category.is_empty() && !subcategory.is_empty() => {
                    Ok(OverrideRule::Subcategory {
                        category: category.to_string(),
                        subcategory: subcategory.to_string(),
                    })
                }
                _ => Err(RuleParseError::MalformedSubcategory(s.to_string())),
            },
            _ => Err(RuleParseError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for OverrideRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideRule::Pattern(pattern) => write!(f, "pattern:{pattern}"),
            OverrideRule::Category(category) => write!(f, "category:{category}"),
            OverrideRule::Subcategory {
                category,
                subcategory,
            } => write!(f, "subcategory:{category}:{subcategory}"),
        }
    }
}

/// Block/allow settings for one layer of configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideSettings {
    /// Block crawlers that collect content for AI model training
    pub block_ai_model_trainers: bool,
    pub custom_blocks: Vec<OverrideRule>,
    pub custom_allows: Vec<OverrideRule>,
}

impl OverrideSettings {
    /// Parse string-encoded rule lists, failing on the first malformed rule.
    pub fn parse(
        block_ai_model_trainers: bool,
        custom_blocks: &[String],
        custom_allows: &[String],
    ) -> Result<Self, RuleParseError> {
        Ok(Self {
            block_ai_model_trainers,
            custom_blocks: parse_rules(custom_blocks)?,
            custom_allows: parse_rules(custom_allows)?,
        })
    }

    /// Parse rule lists from a remote source, skipping malformed rules.
    pub fn parse_lenient(
        block_ai_model_trainers: bool,
        custom_blocks: &[String],
        custom_allows: &[String],
    ) -> Self {
        Self {
            block_ai_model_trainers,
            custom_blocks: parse_rules_lenient(custom_blocks),
            custom_allows: parse_rules_lenient(custom_allows),
        }
    }

    /// Returns the block rule that fires for this classification.
    fn block_reason(&self, classification: &Classification) -> Option<String> {
        if self.block_ai_model_trainers
            && classification
                .bot_info()
                .is_some_and(|info| info.is_ai_model_trainer)
        {
            return Some("ai_model_trainer".to_string());
        }

        self.custom_blocks
            .iter()
            .find(|rule| rule.matches(classification))
            .map(|rule| rule.to_string())
    }

    fn allow_reason(&self, classification: &Classification) -> Option<String> {
        self.custom_allows
            .iter()
            .find(|rule| rule.matches(classification))
            .map(|rule| rule.to_string())
    }
}

fn parse_rules(rules: &[String]) -> Result<Vec<OverrideRule>, RuleParseError> {
    rules.iter().map(|r| r.parse()).collect()
}

fn parse_rules_lenient(rules: &[String]) -> Vec<OverrideRule> {
    rules
        .iter()
        .filter_map(|r| match r.parse() {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(rule = %r, error = %e, "Ignoring malformed override rule");
                None
            }
        })
        .collect()
}

/// Final admit/deny outcome for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub should_block: bool,
    pub source_type: SourceType,
    pub matched_pattern: Option<String>,
    /// Rule that decided the outcome, if any
    pub rule: Option<String>,
}

impl Decision {
    fn admit(classification: &Classification, rule: Option<String>) -> Self {
        Self {
            should_block: false,
            source_type: classification.source_type,
            matched_pattern: classification.matched_pattern.clone(),
            rule,
        }
    }

    fn deny(classification: &Classification, rule: String) -> Self {
        Self {
            should_block: true,
            source_type: classification.source_type,
            matched_pattern: classification.matched_pattern.clone(),
            rule: Some(rule),
        }
    }

    /// Status code of the response this decision produces.
    pub fn response_status(&self) -> u16 {
        if self.should_block {
            403
        } else {
            200
        }
    }
}

/// Combine a classification with override settings.
pub fn evaluate(classification: &Classification, settings: &OverrideSettings) -> Decision {
    evaluate_layers(classification, &[settings])
}

/// Combine a classification with several layers of override settings.
///
/// Any layer may block and any layer may allow; an allow match in any layer
/// vetoes every block.
pub fn evaluate_layers(classification: &Classification, layers: &[&OverrideSettings]) -> Decision {
    // Only bot traffic is blockable; AI referrals are observed, never denied.
    if classification.source_type != SourceType::Bot {
        return Decision::admit(classification, None);
    }

    let Some(block_rule) = layers
        .iter()
        .find_map(|settings| settings.block_reason(classification))
    else {
        return Decision::admit(classification, None);
    };

    match layers
        .iter()
        .find_map(|settings| settings.allow_reason(classification))
    {
        Some(allow_rule) => Decision::admit(classification, Some(allow_rule)),
        None => Decision::deny(classification, block_rule),
    }
}
