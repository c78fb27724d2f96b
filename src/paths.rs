//! Path exclusions.
//!
//! Excluded paths skip classification and telemetry entirely. Static assets
//! are most of the traffic, so this check runs before any detector work.

use regex::Regex;
use std::sync::LazyLock;

/// Path prefixes that are always excluded (framework internals, API routes).
pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] = &["/_next/", "/api/"];

/// Static asset extensions that are always excluded.
static STATIC_ASSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(ico|png|jpg|jpeg|gif|svg|js|css|woff|woff2)$")
        .expect("valid regex: static asset extensions")
});

/// A configured exclusion.
#[derive(Debug, Clone)]
pub enum PathExclusion {
    /// Excludes any path containing the string
    Substring(String),
    /// Excludes any path the regex matches
    Regex(Regex),
}

impl PathExclusion {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathExclusion::Substring(s) => path.contains(s.as_str()),
            PathExclusion::Regex(re) => re.is_match(path),
        }
    }
}

/// Returns true when the path is exempt from classification.
pub fn should_exclude(path: &str, custom: &[PathExclusion]) -> bool {
    if DEFAULT_EXCLUDED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
        || STATIC_ASSET.is_match(path)
    {
        return true;
    }

    custom.iter().any(|exclusion| exclusion.matches(path))
}

/// Default exclusions plus an ordered list of custom ones.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    custom: Vec<PathExclusion>,
}

impl PathFilter {
    pub fn new(custom: Vec<PathExclusion>) -> Self {
        Self { custom }
    }

    pub fn should_exclude(&self, path: &str) -> bool {
        should_exclude(path, &self.custom)
    }
}
