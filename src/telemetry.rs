//! Visit telemetry.
//!
//! Classified visits are posted to a collector. Delivery is best-effort:
//! failures are never surfaced to the request, and a host that tears the
//! process down right after responding may drop a report that is still in
//! flight. There is no retry and no exactly-once guarantee.

use crate::classification::{Classification, SourceInfo, SourceType};
use crate::context::RequestContext;
use crate::error::ReportError;
use crate::rules::Decision;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Classification details attached to a visit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitMetadata {
    pub was_blocked: bool,
    pub source_type: SourceType,
    pub matched_pattern: Option<String>,
    /// Override rule that decided the outcome
    pub rule: Option<String>,
    pub info: Option<SourceInfo>,
}

/// Body posted to the collector for one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub url: String,
    pub user_agent: String,
    pub ip_address: String,
    pub request_method: String,
    pub request_path: String,
    pub request_query: String,
    pub referrer: Option<String>,
    pub response_status: u16,
    pub response_time_ms: u64,
    pub headers: BTreeMap<String, String>,
    /// RFC 3339
    pub timestamp: String,
    pub platform_type: String,
    pub metadata: VisitMetadata,
}

/// Destination for visit events.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, event: &VisitEvent) -> Result<(), ReportError>;
}

/// Posts visit events to the collector endpoint.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CollectorClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zentinel-agent-bot-telemetry/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, endpoint, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TelemetrySink for CollectorClient {
    async fn send(&self, event: &VisitEvent) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Builds visit events and delivers them in the background.
#[derive(Clone)]
pub struct TelemetryReporter {
    sink: Arc<dyn TelemetrySink>,
    platform_type: String,
    debug: bool,
}

impl TelemetryReporter {
    pub fn new(sink: Arc<dyn TelemetrySink>, platform_type: impl Into<String>, debug: bool) -> Self {
        Self {
            sink,
            platform_type: platform_type.into(),
            debug,
        }
    }

    /// Build the event for a classified visit.
    pub fn event(
        &self,
        classification: &Classification,
        decision: &Decision,
        ctx: &RequestContext,
    ) -> VisitEvent {
        VisitEvent {
            url: ctx.url.clone(),
            user_agent: ctx.user_agent.clone(),
            ip_address: ctx.ip_address.clone(),
            request_method: ctx.method.clone(),
            request_path: ctx.path.clone(),
            request_query: ctx.query.clone(),
            referrer: Some(ctx.referrer.clone()).filter(|r| !r.is_empty()),
            response_status: decision.response_status(),
            response_time_ms: ctx.received_at.elapsed().as_millis() as u64,
            headers: ctx.headers.clone(),
            timestamp: Utc::now().to_rfc3339(),
            platform_type: self.platform_type.clone(),
            metadata: VisitMetadata {
                was_blocked: decision.should_block,
                source_type: classification.source_type,
                matched_pattern: decision.matched_pattern.clone(),
                rule: decision.rule.clone(),
                info: classification.info.clone(),
            },
        }
    }

    /// Start delivering a visit report.
    ///
    /// Returns `None` for unclassified traffic, which is never reported.
    /// The returned handle may be awaited or dropped; dropping it does not
    /// cancel delivery.
    pub fn report(
        &self,
        classification: &Classification,
        decision: &Decision,
        ctx: &RequestContext,
    ) -> Option<JoinHandle<()>> {
        if classification.is_none() {
            return None;
        }

        let event = self.event(classification, decision, ctx);
        let sink = Arc::clone(&self.sink);
        let debug = self.debug;

        Some(tokio::spawn(async move {
            match sink.send(&event).await {
                Ok(()) => trace!(
                    path = %event.request_path,
                    status = event.response_status,
                    "Visit reported"
                ),
                Err(e) if debug => warn!(
                    path = %event.request_path,
                    status = event.response_status,
                    error = %e,
                    "Failed to report visit"
                ),
                Err(_) => {}
            }
        }))
    }
}

/// Wait for a report to settle, up to `bound` when one is given.
///
/// Returns false if the bound expired first; the report keeps running.
pub async fn settle(handle: JoinHandle<()>, bound: Option<Duration>) -> bool {
    match bound {
        Some(bound) => matches!(tokio::time::timeout(bound, handle).await, Ok(Ok(()))),
        None => handle.await.is_ok(),
    }
}
