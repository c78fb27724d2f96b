//! Classification types produced by detectors.

use serde::{Deserialize, Serialize};

/// Where a visit originates from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Neither a known bot nor an AI referral
    #[default]
    None,
    /// Crawler or agent identified by its user-agent
    Bot,
    /// Human visitor arriving from an AI assistant
    AiReferrer,
}

impl SourceType {
    /// Returns the source type as a string for logs and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::None => "none",
            SourceType::Bot => "bot",
            SourceType::AiReferrer => "ai_referrer",
        }
    }
}

/// Metadata for a matched bot pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInfo {
    /// Pattern type, e.g. "gptbot"
    pub bot_type: Option<String>,
    /// Category, e.g. "AI Crawler"
    pub category: String,
    /// Subcategory within the category, e.g. "AI Model Training"
    pub subcategory: String,
    pub company: Option<String>,
    /// Whether the bot honours robots.txt
    pub is_compliant: bool,
    /// Whether the bot collects content to train AI models
    pub is_ai_model_trainer: bool,
    pub intent: Option<String>,
    pub url: Option<String>,
}

/// Metadata for a matched AI referrer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerInfo {
    pub id: String,
    pub name: String,
    pub company: Option<String>,
    pub url: Option<String>,
}

/// Structured metadata attached to a classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceInfo {
    Bot(BotInfo),
    AiReferrer(ReferrerInfo),
}

/// Detector output for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub source_type: SourceType,
    pub is_bot: bool,
    /// Source of the pattern that matched, if any
    pub matched_pattern: Option<String>,
    pub info: Option<SourceInfo>,
}

impl Classification {
    /// Classification for ordinary traffic.
    pub fn none() -> Self {
        Self::default()
    }

    /// Classification for a request whose user-agent matched a bot pattern.
    pub fn bot(pattern: impl Into<String>, info: BotInfo) -> Self {
        Self {
            source_type: SourceType::Bot,
            is_bot: true,
            matched_pattern: Some(pattern.into()),
            info: Some(SourceInfo::Bot(info)),
        }
    }

    /// Classification for a request referred by an AI assistant.
    pub fn ai_referrer(pattern: impl Into<String>, info: ReferrerInfo) -> Self {
        Self {
            source_type: SourceType::AiReferrer,
            is_bot: false,
            matched_pattern: Some(pattern.into()),
            info: Some(SourceInfo::AiReferrer(info)),
        }
    }

    /// Bot metadata, when this is a bot classification.
    pub fn bot_info(&self) -> Option<&BotInfo> {
        match &self.info {
            Some(SourceInfo::Bot(info)) => Some(info),
            _ => None,
        }
    }

    /// True when the request is neither a bot nor an AI referral.
    pub fn is_none(&self) -> bool {
        self.source_type == SourceType::None
    }
}
