//! Traffic classification.
//!
//! A detector turns a user-agent and referrer into a [`Classification`].
//! The agent treats detectors as opaque; [`PatternDetector`] is the shipped
//! implementation backed by the ruleset cache.

pub mod patterns;

pub use patterns::PatternDetector;

use crate::classification::Classification;
use crate::error::DetectError;
use async_trait::async_trait;

/// Trait for traffic classifiers.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Classify a request by its user-agent and referrer.
    ///
    /// Both arguments are empty strings when the header is absent.
    async fn detect(&self, user_agent: &str, referrer: &str) -> Result<Classification, DetectError>;

    /// Get the detector name.
    fn name(&self) -> &'static str;
}
