//! Ruleset-backed pattern detector.
//!
//! Identifies:
//! - Bots, by the first ruleset pattern matching the user-agent
//! - AI-referred visitors, by the first AI referrer found in the referrer

use super::Detector;
use crate::classification::Classification;
use crate::error::DetectError;
use crate::ruleset::{ActiveRuleset, RulesetCache};
use async_trait::async_trait;

/// Detector that matches against the active ruleset.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    rulesets: RulesetCache,
}

impl PatternDetector {
    pub fn new(rulesets: RulesetCache) -> Self {
        Self { rulesets }
    }

    /// Classify against a specific ruleset snapshot.
    pub fn classify(ruleset: &ActiveRuleset, user_agent: &str, referrer: &str) -> Classification {
        if !user_agent.is_empty() {
            if let Some(bot) = ruleset
                .bot_patterns()
                .iter()
                .find(|bot| bot.regex.is_match(user_agent))
            {
                return Classification::bot(bot.definition.pattern.clone(), bot.definition.info());
            }
        }

        if !referrer.is_empty() {
            let referrer = referrer.to_lowercase();
            for candidate in ruleset.referrers() {
                if let Some(pattern) = candidate
                    .patterns
                    .iter()
                    .find(|p| referrer.contains(p.as_str()))
                {
                    return Classification::ai_referrer(pattern.clone(), candidate.definition.info());
                }
            }
        }

        Classification::none()
    }
}

#[async_trait]
impl Detector for PatternDetector {
    async fn detect(&self, user_agent: &str, referrer: &str) -> Result<Classification, DetectError> {
        let ruleset = self.rulesets.current();
        Ok(Self::classify(&ruleset, user_agent, referrer))
    }

    fn name(&self) -> &'static str {
        "pattern_detector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::{SourceInfo, SourceType};
    use crate::ruleset::{BotPattern, Ruleset};

    fn detector() -> PatternDetector {
        PatternDetector::new(RulesetCache::new())
    }

    #[tokio::test]
    async fn test_search_crawler() {
        let c = detector()
            .detect(
                "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
                "",
            )
            .await
            .unwrap();

        assert_eq!(c.source_type, SourceType::Bot);
        assert!(c.is_bot);
        assert_eq!(c.matched_pattern.as_deref(), Some("Googlebot"));
        let info = c.bot_info().unwrap();
        assert_eq!(info.category, "Search Crawler");
        assert!(!info.is_ai_model_trainer);
    }

    #[tokio::test]
    async fn test_ai_model_trainer() {
        let c = detector()
            .detect("Mozilla/5.0 AppleWebKit/537.36 (KHTML, like Gecko; compatible; GPTBot/1.2; +https://openai.com/gptbot)", "")
            .await
            .unwrap();

        assert_eq!(c.matched_pattern.as_deref(), Some("GPTBot"));
        assert!(c.bot_info().unwrap().is_ai_model_trainer);
    }

    #[tokio::test]
    async fn test_match_is_case_insensitive() {
        let c = detector().detect("googlebot", "").await.unwrap();
        assert_eq!(c.source_type, SourceType::Bot);
    }

    #[tokio::test]
    async fn test_ai_referrer() {
        let c = detector()
            .detect(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) Safari/605.1.15",
                "https://ChatGPT.com/c/abc123",
            )
            .await
            .unwrap();

        assert_eq!(c.source_type, SourceType::AiReferrer);
        assert!(!c.is_bot);
        assert_eq!(c.matched_pattern.as_deref(), Some("chatgpt.com"));
        match c.info {
            Some(SourceInfo::AiReferrer(info)) => assert_eq!(info.id, "chatgpt"),
            other => panic!("unexpected info: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bot_wins_over_referrer() {
        let c = detector()
            .detect("Claude-User/1.0", "https://claude.ai/chat")
            .await
            .unwrap();
        assert_eq!(c.source_type, SourceType::Bot);
    }

    #[tokio::test]
    async fn test_human_traffic() {
        let c = detector()
            .detect(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.0.0",
                "https://www.google.com/",
            )
            .await
            .unwrap();
        assert!(c.is_none());

        let c = detector().detect("", "").await.unwrap();
        assert!(c.is_none());
    }

    #[tokio::test]
    async fn test_reads_current_ruleset() {
        let cache = RulesetCache::with_ruleset(Ruleset {
            version: "custom".to_string(),
            patterns: vec![BotPattern {
                pattern: "InternalCrawler/[0-9]+".to_string(),
                category: "Monitoring".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let detector = PatternDetector::new(cache);

        let c = detector.detect("InternalCrawler/3", "").await.unwrap();
        assert_eq!(c.matched_pattern.as_deref(), Some("InternalCrawler/[0-9]+"));

        let c = detector.detect("Googlebot", "").await.unwrap();
        assert!(c.is_none());
    }
}
