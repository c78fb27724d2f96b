//! Process-wide ruleset cache with single-flight refresh.
//!
//! Requests read the active ruleset through [`RulesetCache::current`], which
//! only clones an `Arc`. A refresh fetches and compiles a new ruleset on a
//! background task and swaps it in on success. Concurrent refresh triggers
//! share the one in-flight task instead of issuing another fetch.

use super::{ActiveRuleset, Ruleset, RulesetSource};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default age after which a synced ruleset is fetched again.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type SyncResult = Result<Arc<ActiveRuleset>, SyncError>;
type Flight = Shared<BoxFuture<'static, SyncResult>>;

enum SyncState {
    Idle,
    Syncing(Flight),
    Synced { at: Instant, wall: DateTime<Utc> },
    /// Retryable; the next trigger starts a new sync.
    Failed(SyncError),
}

/// Snapshot of the sync state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced { at: DateTime<Utc> },
    Failed { error: SyncError },
}

struct CacheInner {
    active: RwLock<Arc<ActiveRuleset>>,
    state: Mutex<SyncState>,
    source: Option<Arc<dyn RulesetSource>>,
    ttl: Duration,
    debug: bool,
}

impl CacheInner {
    /// Record the outcome of a sync. Only a success touches the active ruleset.
    fn complete(&self, result: SyncResult) -> SyncResult {
        {
            let mut state = self.state.lock();
            match &result {
                Ok(active) => {
                    *self.active.write() = Arc::clone(active);
                    *state = SyncState::Synced {
                        at: Instant::now(),
                        wall: Utc::now(),
                    };
                }
                Err(e) => *state = SyncState::Failed(e.clone()),
            }
        }

        match &result {
            Ok(active) => info!(
                version = %active.version(),
                patterns = active.bot_patterns().len(),
                ai_referrers = active.referrers().len(),
                "Ruleset synced"
            ),
            Err(e) if self.debug => warn!(error = %e, "Ruleset sync failed, keeping previous ruleset"),
            Err(_) => {}
        }

        result
    }
}

/// Resets a sync left in `Syncing` by a task that never reached `complete`.
struct SyncGuard<'a> {
    inner: &'a CacheInner,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if matches!(*state, SyncState::Syncing(_)) {
            *state = SyncState::Idle;
        }
    }
}

/// Shared handle to the active ruleset and its sync coordinator.
///
/// Cloning is cheap; every clone sees the same ruleset and the same
/// in-flight sync.
#[derive(Clone)]
pub struct RulesetCache {
    inner: Arc<CacheInner>,
}

impl RulesetCache {
    /// Cache holding the builtin ruleset, with no remote source.
    pub fn new() -> Self {
        Self::build(ActiveRuleset::builtin(), None, DEFAULT_CACHE_TTL, false)
    }

    /// Cache that starts with the builtin ruleset and syncs from `source`.
    pub fn with_source(source: Arc<dyn RulesetSource>, ttl: Duration, debug: bool) -> Self {
        Self::build(ActiveRuleset::builtin(), Some(source), ttl, debug)
    }

    /// Cache pinned to a pre-supplied ruleset. It never syncs.
    pub fn with_ruleset(ruleset: Ruleset) -> Self {
        Self::build(ActiveRuleset::compile(ruleset), None, DEFAULT_CACHE_TTL, false)
    }

    fn build(
        active: ActiveRuleset,
        source: Option<Arc<dyn RulesetSource>>,
        ttl: Duration,
        debug: bool,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                active: RwLock::new(Arc::new(active)),
                state: Mutex::new(SyncState::Idle),
                source,
                ttl,
                debug,
            }),
        }
    }

    /// The ruleset active right now.
    pub fn current(&self) -> Arc<ActiveRuleset> {
        Arc::clone(&self.inner.active.read())
    }

    /// Whether this cache can sync at all.
    pub fn has_source(&self) -> bool {
        self.inner.source.is_some()
    }

    pub fn status(&self) -> SyncStatus {
        match &*self.inner.state.lock() {
            SyncState::Idle => SyncStatus::Idle,
            SyncState::Syncing(_) => SyncStatus::Syncing,
            SyncState::Synced { wall, .. } => SyncStatus::Synced { at: *wall },
            SyncState::Failed(error) => SyncStatus::Failed {
                error: error.clone(),
            },
        }
    }

    /// Sync unless the ruleset is still fresh. Never fails.
    ///
    /// Without a source this is a no-op. If a sync is already running the
    /// caller waits on that one.
    pub async fn ensure_fresh(&self) {
        if let Some(flight) = self.join_or_start(false) {
            // Failures are recorded in the state and logged by `complete`.
            let _ = flight.await;
        }
    }

    /// Sync now, joining an in-flight sync if there is one.
    pub async fn refresh(&self) -> SyncResult {
        match self.join_or_start(true) {
            Some(flight) => flight.await,
            None => Err(SyncError::NoSource),
        }
    }

    fn join_or_start(&self, force: bool) -> Option<Flight> {
        let source = self.inner.source.as_ref()?;
        let mut state = self.inner.state.lock();

        match &*state {
            SyncState::Syncing(flight) => return Some(flight.clone()),
            SyncState::Synced { at, .. } if !force && at.elapsed() < self.inner.ttl => {
                return None;
            }
            _ => {}
        }

        let flight = self.start_flight(Arc::clone(source));
        *state = SyncState::Syncing(flight.clone());
        Some(flight)
    }

    /// Spawn the fetch so it completes even if every waiter goes away.
    fn start_flight(&self, source: Arc<dyn RulesetSource>) -> Flight {
        let inner = Arc::clone(&self.inner);
        debug!("Starting ruleset sync");

        let task = tokio::spawn(async move {
            let _guard = SyncGuard { inner: inner.as_ref() };
            let result = source
                .fetch()
                .await
                .map(|ruleset| Arc::new(ActiveRuleset::compile(ruleset)));
            inner.complete(result)
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared()
    }
}

impl Default for RulesetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RulesetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesetCache")
            .field("version", &self.current().version())
            .field("status", &self.status())
            .field("has_source", &self.has_source())
            .finish()
    }
}
