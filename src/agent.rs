//! Main bot telemetry agent implementation.
//!
//! Per request: skip excluded paths, classify, apply override rules, report
//! the visit and answer with either a pass-through or a 403.

use crate::classification::Classification;
use crate::config::{BlockedReporting, BotTelemetryConfig};
use crate::context::RequestContext;
use crate::detectors::{Detector, PatternDetector};
use crate::error::ConfigError;
use crate::paths::PathFilter;
use crate::rules::{evaluate_layers, Decision, OverrideSettings};
use crate::ruleset::{HttpRulesetSource, RulesetCache};
use crate::telemetry::{settle, CollectorClient, TelemetryReporter, TelemetrySink};
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Body of the response sent to denied requests.
pub const DENY_BODY: &str = "Access Denied";

/// Outcome of inspecting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the request to the application unchanged
    PassThrough,
    /// Answer with [`denied_response`]
    Deny,
}

/// The terminal response for denied requests.
pub fn denied_response() -> Response<String> {
    let mut response = Response::new(DENY_BODY.to_string());
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("text/plain"));
    response
}

/// Bot telemetry agent.
pub struct BotTelemetryAgent {
    /// Log sync and delivery failures
    debug: bool,
    /// Built-in and configured path exclusions
    paths: PathFilter,
    /// Locally configured override rules
    overrides: OverrideSettings,
    /// How blocked visits are reported
    blocked_reporting: BlockedReporting,
    detector: Arc<dyn Detector>,
    rulesets: RulesetCache,
    /// Present only when an API key is configured
    reporter: Option<TelemetryReporter>,
}

impl BotTelemetryAgent {
    /// Create an agent from configuration with the default collaborators.
    pub fn new(config: BotTelemetryConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: BotTelemetryConfig) -> AgentBuilder {
        AgentBuilder {
            config,
            detector: None,
            sink: None,
            rulesets: None,
        }
    }

    /// The ruleset cache this agent reads from.
    pub fn rulesets(&self) -> &RulesetCache {
        &self.rulesets
    }

    /// Whether visits are reported.
    pub fn reports_visits(&self) -> bool {
        self.reporter.is_some()
    }

    /// Snapshot a request, or `None` when its path is excluded.
    pub fn context_for<B>(&self, request: &Request<B>) -> Option<RequestContext> {
        let path = request.uri().path();
        if self.paths.should_exclude(path) {
            trace!(path = %path, "Path excluded from inspection");
            return None;
        }
        Some(RequestContext::from_request(request))
    }

    /// Inspect a request end to end.
    pub async fn inspect<B>(&self, request: &Request<B>) -> Verdict {
        match self.context_for(request) {
            Some(ctx) => self.process(&ctx).await,
            None => Verdict::PassThrough,
        }
    }

    /// Classify, decide and report a request that was not excluded.
    pub async fn process(&self, ctx: &RequestContext) -> Verdict {
        // Overrides come from the ruleset active when the request arrived.
        let ruleset = self.rulesets.current();
        let classification = self.classify(ctx).await;
        if classification.is_none() {
            return Verdict::PassThrough;
        }

        let decision = evaluate_layers(&classification, &[&self.overrides, ruleset.overrides()]);

        debug!(
            path = %ctx.path,
            source_type = classification.source_type.as_str(),
            matched_pattern = ?decision.matched_pattern,
            rule = ?decision.rule,
            blocked = decision.should_block,
            ruleset_version = %ruleset.version(),
            "Request classified"
        );

        if decision.should_block {
            self.report_blocked(&classification, &decision, ctx).await;
            info!(
                path = %ctx.path,
                client_ip = %ctx.ip_address,
                matched_pattern = ?decision.matched_pattern,
                rule = ?decision.rule,
                "Request blocked"
            );
            return Verdict::Deny;
        }

        if let Some(reporter) = &self.reporter {
            // Detached: the response does not wait for delivery.
            let _ = reporter.report(&classification, &decision, ctx);
        }
        Verdict::PassThrough
    }

    /// Run the detector. A failing detector counts as unclassified traffic.
    async fn classify(&self, ctx: &RequestContext) -> Classification {
        match self.detector.detect(&ctx.user_agent, &ctx.referrer).await {
            Ok(classification) => classification,
            Err(e) => {
                if self.debug {
                    warn!(detector = self.detector.name(), error = %e, "Detection failed, treating request as unclassified");
                }
                Classification::none()
            }
        }
    }

    async fn report_blocked(
        &self,
        classification: &Classification,
        decision: &Decision,
        ctx: &RequestContext,
    ) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        match self.blocked_reporting {
            BlockedReporting::Skip => {}
            BlockedReporting::Detached => {
                let _ = reporter.report(classification, decision, ctx);
            }
            BlockedReporting::Wait(bound) => {
                if let Some(handle) = reporter.report(classification, decision, ctx) {
                    if !settle(handle, bound).await && self.debug {
                        warn!(path = %ctx.path, "Blocked visit report did not settle before responding");
                    }
                }
            }
        }
    }
}

/// Builder for [`BotTelemetryAgent`] with replaceable collaborators.
pub struct AgentBuilder {
    config: BotTelemetryConfig,
    detector: Option<Arc<dyn Detector>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    rulesets: Option<RulesetCache>,
}

impl AgentBuilder {
    /// Use a custom detector instead of the ruleset pattern detector.
    pub fn detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Use a custom telemetry sink instead of the collector client.
    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share an existing ruleset cache, e.g. between several agents.
    /// Takes precedence over a pre-supplied ruleset in the config.
    pub fn rulesets(mut self, rulesets: RulesetCache) -> Self {
        self.rulesets = Some(rulesets);
        self
    }

    /// Build the agent and start a background ruleset sync when possible.
    pub fn build(self) -> Result<BotTelemetryAgent, ConfigError> {
        let config = self.config;
        let settings = config.compile()?;
        let api_key = config.api_key();

        let rulesets = match (self.rulesets, &config.ruleset) {
            (Some(rulesets), _) => rulesets,
            (None, Some(ruleset)) => RulesetCache::with_ruleset(ruleset.clone()),
            (None, None) => match api_key {
                Some(key) => {
                    let source = HttpRulesetSource::new(
                        config.patterns_endpoint.clone(),
                        key,
                        config.request_timeout(),
                    )?;
                    RulesetCache::with_source(Arc::new(source), config.cache_ttl(), config.debug)
                }
                None => RulesetCache::new(),
            },
        };

        let reporter = match (api_key, self.sink) {
            (None, _) => None,
            (Some(_), Some(sink)) => Some(TelemetryReporter::new(sink, &config.platform_type, config.debug)),
            (Some(key), None) => {
                let sink = CollectorClient::new(
                    config.collect_endpoint.clone(),
                    key,
                    config.request_timeout(),
                )?;
                Some(TelemetryReporter::new(Arc::new(sink), &config.platform_type, config.debug))
            }
        };

        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(PatternDetector::new(rulesets.clone())));

        if api_key.is_some() {
            start_background_sync(&rulesets);
        }

        info!(
            telemetry = reporter.is_some(),
            ruleset_version = %rulesets.current().version(),
            syncs = rulesets.has_source(),
            "Bot telemetry agent ready"
        );

        Ok(BotTelemetryAgent {
            debug: config.debug,
            paths: PathFilter::new(settings.exclusions),
            overrides: settings.overrides,
            blocked_reporting: settings.blocked_reporting,
            detector,
            rulesets,
            reporter,
        })
    }
}

/// Kick off a sync without waiting for it.
fn start_background_sync(rulesets: &RulesetCache) {
    if !rulesets.has_source() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let rulesets = rulesets.clone();
            handle.spawn(async move { rulesets.ensure_fresh().await });
        }
        Err(_) => debug!("No async runtime available, skipping initial ruleset sync"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::BotInfo;
    use crate::config::PathExclusionConfig;
    use crate::error::{DetectError, SyncError};
    use crate::ruleset::{PropertySettings, Ruleset, RulesetSource};
    use async_trait::async_trait;
    use std::time::Duration;

    fn request(path: &str, ua: &str) -> Request<()> {
        Request::builder()
            .uri(path)
            .header("user-agent", ua)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_agent_defaults() {
        let agent = BotTelemetryAgent::new(BotTelemetryConfig::default()).unwrap();
        assert!(!agent.reports_visits());
        assert!(!agent.rulesets().has_source());
        assert_eq!(agent.inspect(&request("/", "")).await, Verdict::PassThrough);
    }

    #[tokio::test]
    async fn test_context_for_excluded_path() {
        let agent = BotTelemetryAgent::new(BotTelemetryConfig {
            exclude_paths: vec![PathExclusionConfig::Substring("/admin".to_string())],
            ..Default::default()
        })
        .unwrap();

        assert!(agent.context_for(&request("/admin/users", "GPTBot")).is_none());
        assert!(agent.context_for(&request("/static/app.js", "GPTBot")).is_none());
        assert!(agent.context_for(&request("/docs", "GPTBot")).is_some());
    }

    #[tokio::test]
    async fn test_blocks_without_api_key() {
        let agent = BotTelemetryAgent::new(BotTelemetryConfig {
            block_ai_model_trainers: true,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(agent.inspect(&request("/", "CCBot/2.0")).await, Verdict::Deny);
        assert_eq!(agent.inspect(&request("/", "Googlebot")).await, Verdict::PassThrough);
    }

    #[tokio::test]
    async fn test_pre_supplied_ruleset_disables_sync() {
        let agent = BotTelemetryAgent::new(BotTelemetryConfig {
            api_key: Some("key".to_string()),
            ruleset: Some(crate::ruleset::Ruleset::default()),
            ..Default::default()
        })
        .unwrap();

        assert!(agent.reports_visits());
        assert!(!agent.rulesets().has_source());
        // The empty ruleset classifies nothing.
        assert_eq!(agent.inspect(&request("/", "GPTBot")).await, Verdict::PassThrough);
    }

    /// Serves a ruleset whose property settings block search crawlers.
    struct BlockingSettingsSource;

    #[async_trait]
    impl RulesetSource for BlockingSettingsSource {
        async fn fetch(&self) -> Result<Ruleset, SyncError> {
            Ok(Ruleset {
                version: "remote".to_string(),
                property_settings: PropertySettings {
                    custom_blocks: vec!["category:Search Crawler".to_string()],
                    ..Default::default()
                },
                ..Ruleset::builtin()
            })
        }
    }

    /// Detector that lets a sync land while it classifies.
    struct SyncingDetector {
        rulesets: RulesetCache,
    }

    #[async_trait]
    impl Detector for SyncingDetector {
        async fn detect(&self, _user_agent: &str, _referrer: &str) -> Result<Classification, DetectError> {
            self.rulesets
                .refresh()
                .await
                .map_err(|e| DetectError::new("syncing", e.to_string()))?;
            Ok(Classification::bot(
                "Googlebot",
                BotInfo {
                    category: "Search Crawler".to_string(),
                    ..Default::default()
                },
            ))
        }

        fn name(&self) -> &'static str {
            "syncing"
        }
    }

    #[tokio::test]
    async fn test_overrides_come_from_request_start_snapshot() {
        let rulesets = RulesetCache::with_source(
            Arc::new(BlockingSettingsSource),
            Duration::from_secs(3600),
            false,
        );
        let agent = BotTelemetryAgent::builder(BotTelemetryConfig::default())
            .rulesets(rulesets.clone())
            .detector(Arc::new(SyncingDetector {
                rulesets: rulesets.clone(),
            }))
            .build()
            .unwrap();

        // The sync lands mid-request; its settings apply from the next request.
        assert_eq!(agent.inspect(&request("/", "Googlebot")).await, Verdict::PassThrough);
        assert_eq!(rulesets.current().version(), "remote");
        assert_eq!(agent.inspect(&request("/", "Googlebot")).await, Verdict::Deny);
    }

    #[test]
    fn test_denied_response() {
        let response = denied_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(response.body(), "Access Denied");
    }
}
