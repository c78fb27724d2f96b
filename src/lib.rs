//! Bot Telemetry Agent for Zentinel
//!
//! Classifies inbound HTTP requests as bot traffic, AI-referred traffic or
//! ordinary traffic, applies block/allow rules and reports classified visits
//! to a telemetry collector.
//!
//! # Features
//!
//! - Static asset and configurable path exclusions
//! - User-agent and AI referrer detection from a synced ruleset
//! - Block/allow overrides by pattern, category or subcategory
//! - Single-flight ruleset sync with replace-on-success semantics
//! - Fire-and-forget visit reporting with bounded waits for blocked visits
//!
//! # Example
//!
//! ```ignore
//! use zentinel_agent_bot_telemetry::{guard, BotTelemetryAgent, BotTelemetryConfig};
//!
//! let agent = Arc::new(BotTelemetryAgent::new(BotTelemetryConfig::default())?);
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(axum::middleware::from_fn_with_state(agent, guard));
//! ```

pub mod agent;
pub mod classification;
pub mod config;
pub mod context;
pub mod detectors;
pub mod error;
pub mod layer;
pub mod paths;
pub mod rules;
pub mod ruleset;
pub mod telemetry;

pub use agent::{denied_response, AgentBuilder, BotTelemetryAgent, Verdict};
pub use classification::{Classification, SourceType};
pub use config::BotTelemetryConfig;
pub use layer::guard;
pub use rules::{evaluate, Decision, OverrideRule, OverrideSettings};
pub use ruleset::{RulesetCache, SyncStatus};
pub use telemetry::{TelemetryReporter, TelemetrySink, VisitEvent};
