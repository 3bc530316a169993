//! Time-bounded cache around the semantic map builder.
//!
//! At most one build runs at a time; a refresh that finds a build in flight
//! returns immediately and relies on the later [`AppEvent::MapUpdated`].
//! Host change notifications invalidate the cached map.

use crate::builder::SemanticMapBuilder;
use crate::error::BuildError;
use crate::events::{AppEvent, EventBus};
use crate::host::WorkbookHost;
use crate::map::SemanticMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_MAP_TTL: Duration = Duration::from_secs(90);

/// Cached map plus the instant it was built. `built_at == None` is the epoch.
#[derive(Debug, Clone)]
pub struct CacheState {
    value: Option<Arc<SemanticMap>>,
    built_at: Option<Instant>,
    ttl: Duration,
}

impl CacheState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            built_at: None,
            ttl,
        }
    }

    pub fn value(&self) -> Option<&Arc<SemanticMap>> {
        self.value.as_ref()
    }

    pub fn built_at(&self) -> Option<Instant> {
        self.built_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A value exists and was built less than `ttl` ago.
    pub fn is_fresh(&self, now: Instant) -> bool {
        match (&self.value, self.built_at) {
            (Some(_), Some(built_at)) => now.saturating_duration_since(built_at) < self.ttl,
            _ => false,
        }
    }

    fn store(&mut self, map: Arc<SemanticMap>, now: Instant) {
        self.value = Some(map);
        self.built_at = Some(now);
    }

    fn clear(&mut self) {
        self.value = None;
        self.built_at = None;
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Another build was already running
    InFlight,
    /// The cached map is still within its TTL
    Fresh,
    Rebuilt(Arc<SemanticMap>),
    /// The build failed; any previous map is still cached
    Failed(BuildError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub builds: u64,
    pub failures: u64,
    pub hits: u64,
    pub skipped_in_flight: u64,
    pub invalidations: u64,
}

/// Clears the in-flight flag however the build ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SemanticMapCache {
    host: Arc<dyn WorkbookHost>,
    builder: SemanticMapBuilder,
    events: EventBus,
    state: Mutex<CacheState>,
    in_flight: AtomicBool,
    builds: AtomicU64,
    failures: AtomicU64,
    hits: AtomicU64,
    skipped: AtomicU64,
    invalidations: AtomicU64,
}

impl SemanticMapCache {
    pub fn new(
        host: Arc<dyn WorkbookHost>,
        builder: SemanticMapBuilder,
        ttl: Duration,
        events: EventBus,
    ) -> Self {
        Self {
            host,
            builder,
            events,
            state: Mutex::new(CacheState::new(ttl)),
            in_flight: AtomicBool::new(false),
            builds: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &Arc<dyn WorkbookHost> {
        &self.host
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> CacheState {
        self.state.lock().clone()
    }

    pub fn is_building(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        if self.is_building() {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!("semantic map build already in flight");
            return RefreshOutcome::InFlight;
        }

        if !force && self.state.lock().is_fresh(Instant::now()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("using cached semantic map");
            return RefreshOutcome::Fresh;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return RefreshOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        info!(force, "refreshing semantic map");
        self.builds.fetch_add(1, Ordering::Relaxed);
        match self.builder.build(self.host.as_ref()).await {
            Ok(map) => {
                let map = Arc::new(map);
                self.state.lock().store(map.clone(), Instant::now());
                info!(lines = map.len(), "semantic map updated");
                self.events.emit(AppEvent::MapUpdated { map: map.clone() });
                RefreshOutcome::Rebuilt(map)
            }
            Err(error) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%error, "semantic map refresh failed");
                self.events.emit(AppEvent::MapRefreshFailed {
                    message: error.to_string(),
                });
                RefreshOutcome::Failed(error)
            }
        }
    }

    /// Drops the cached map. A build already running is not cancelled.
    pub fn invalidate(&self) {
        self.state.lock().clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        info!("semantic map cache invalidated");
    }

    pub fn current(&self) -> Option<Arc<SemanticMap>> {
        self.state.lock().value.clone()
    }

    /// The cached map as text, empty when nothing is cached.
    pub fn current_text(&self) -> String {
        self.current().map(|map| map.to_text()).unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            builds: self.builds.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Invalidates the cache whenever the host reports a sheet change.
    ///
    /// Returns `None` when the host has no change notifications.
    pub fn watch_host_changes(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.host.subscribe_changes()?;
        let cache = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(sheet = %change.sheet, "workbook changed");
                        cache.invalidate();
                        cache.events.emit(AppEvent::WorkbookChanged {
                            sheet: change.sheet,
                        });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "change notifications lagged, invalidating");
                        cache.invalidate();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}
