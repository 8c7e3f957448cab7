//! Hot-reloadable route engine.
//!
//! The engine publishes the current [`RouteSnapshot`] through an
//! `ArcSwapOption` so lookups never wait on a reload. On top of the `Arc`
//! reference count every lookup pins the snapshot it uses, which lets a
//! reload observe when the superseded generation has drained.
//!
//! ```text
//! lookup -> RouteEngine::acquire() -> pin + re-check -> SnapshotGuard
//!                                                          |
//!                                                   drop -> unpin
//!
//! reload -> RouteSource::load() -> fixup -> swap -> drain old (backoff)
//! ```
//!
//! One reload or administrative edit runs at a time; callers serialize
//! writers (the IPC handler does so with a mutex).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use carrier_router::routing::{HashInputs, HashSource, RouteEngine, RouteRequest, RouteSpec};
//! use carrier_router::source::FnSource;
//!
//! let source = FnSource::new(|b| {
//!     let carrier = b.add_carrier("default");
//!     let domain = b.add_domain(carrier, "proxy")?;
//!     b.add_route(RouteSpec::new(carrier, domain, "49", "gw1.example.net"))
//! });
//! let engine = RouteEngine::new(Arc::new(source));
//! engine.reload().unwrap();
//!
//! let request = RouteRequest::new(0, "proxy", "4930123")
//!     .with_hash(HashSource::CallId, HashInputs::with_call_id("a84b4c76e66710"));
//! let decision = engine.route(&request).unwrap();
//! assert_eq!(decision.uri, "sip:4930123@gw1.example.net");
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::dump::RouteDump;
use super::lookup::{LookupOptions, NextDomain, NextDomainRequest, RouteDecision, RouteRequest};
use super::snapshot::{RouteSnapshot, SnapshotBuilder, SnapshotState, SnapshotStats};
use super::trie::MatchMode;
use crate::error::{LookupError, ReloadError};
use crate::source::RouteSource;

/// How a reload waits for readers of the superseded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// First sleep between reader count checks.
    pub initial_backoff: Duration,
    /// Upper bound of the doubling sleep.
    pub max_backoff: Duration,
    /// Waiting longer than this logs a warning once.
    pub warn_after: Duration,
    /// Stop waiting after this long; `None` waits forever.
    pub give_up_after: Option<Duration>,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_micros(10),
            max_backoff: Duration::from_millis(10),
            warn_after: Duration::from_secs(1),
            give_up_after: None,
        }
    }
}

impl DrainPolicy {
    /// Set the give-up limit.
    #[must_use]
    pub const fn with_give_up_after(mut self, limit: Duration) -> Self {
        self.give_up_after = Some(limit);
        self
    }

    /// Set the warning threshold.
    #[must_use]
    pub const fn with_warn_after(mut self, warn_after: Duration) -> Self {
        self.warn_after = warn_after;
        self
    }
}

/// Result of waiting for the superseded snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DrainOutcome {
    /// First load; there was no previous snapshot.
    NothingToDrain,
    /// The previous snapshot has no readers left.
    Drained,
    /// The wait was abandoned with readers still pinning the snapshot.
    GaveUp {
        /// Readers at the time of giving up.
        readers: usize,
    },
}

/// Summary of one successful reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadReport {
    /// Generation now live.
    pub generation: u64,
    /// Time spent loading and fixing up, in microseconds.
    pub load_time_us: u64,
    /// Time spent draining the previous snapshot, in microseconds.
    pub drain_time_us: u64,
    /// Drain result.
    pub drain: DrainOutcome,
    /// Counts of the new snapshot.
    pub stats: SnapshotStats,
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Pinned snapshot; unpins on drop.
///
/// Holding a guard keeps the snapshot's contents stable across any number
/// of reloads.
#[derive(Debug)]
pub struct SnapshotGuard {
    snapshot: Arc<RouteSnapshot>,
}

impl SnapshotGuard {
    /// The pinned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<RouteSnapshot> {
        &self.snapshot
    }
}

impl Deref for SnapshotGuard {
    type Target = RouteSnapshot;

    fn deref(&self) -> &RouteSnapshot {
        &self.snapshot
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.snapshot.unpin();
    }
}

/// Route engine with atomic snapshot replacement.
pub struct RouteEngine {
    current: ArcSwapOption<RouteSnapshot>,
    source: Arc<dyn RouteSource>,
    mode: MatchMode,
    default_carrier: Option<String>,
    options: LookupOptions,
    drain: DrainPolicy,
    generation: AtomicU64,
}

impl std::fmt::Debug for RouteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEngine")
            .field("source", &self.source.describe())
            .field("mode", &self.mode)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl RouteEngine {
    /// Engine reading from `source`; nothing is loaded until the first
    /// [`RouteEngine::reload`].
    #[must_use]
    pub fn new(source: Arc<dyn RouteSource>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            source,
            mode: MatchMode::default(),
            default_carrier: None,
            options: LookupOptions::default(),
            drain: DrainPolicy::default(),
            generation: AtomicU64::new(0),
        }
    }

    /// Set the trie alphabet.
    #[must_use]
    pub const fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Name the default carrier, overriding what the source sets.
    #[must_use]
    pub fn with_default_carrier(mut self, name: impl Into<String>) -> Self {
        self.default_carrier = Some(name.into());
        self
    }

    /// Set the lookup options.
    #[must_use]
    pub const fn with_options(mut self, options: LookupOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the drain policy.
    #[must_use]
    pub const fn with_drain_policy(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    /// Route source.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn RouteSource> {
        &self.source
    }

    /// Lookup options.
    #[must_use]
    pub const fn options(&self) -> &LookupOptions {
        &self.options
    }

    /// Trie alphabet.
    #[must_use]
    pub const fn match_mode(&self) -> MatchMode {
        self.mode
    }

    /// True once a snapshot has been published.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Generation of the live snapshot, 0 if none.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current.load().as_ref().map_or(0, |s| s.generation())
    }

    /// Pin the live snapshot.
    ///
    /// # Errors
    ///
    /// `LookupError::Unavailable` if nothing has been loaded yet.
    pub fn acquire(&self) -> Result<SnapshotGuard, LookupError> {
        loop {
            let snapshot = self.current.load_full().ok_or(LookupError::Unavailable)?;
            snapshot.pin();

            // a reload may have swapped between load and pin
            let current = self.current.load();
            if matches!(&*current, Some(live) if Arc::ptr_eq(live, &snapshot)) {
                return Ok(SnapshotGuard { snapshot });
            }
            snapshot.unpin();
            debug!("snapshot superseded while pinning, retrying");
        }
    }

    /// Route a request against the live snapshot.
    ///
    /// # Errors
    ///
    /// See [`RouteSnapshot::route`]; `Unavailable` before the first load.
    pub fn route(&self, request: &RouteRequest) -> Result<RouteDecision, LookupError> {
        let snapshot = self.acquire()?;
        snapshot.route(request, &self.options)
    }

    /// Failure routing against the live snapshot.
    ///
    /// # Errors
    ///
    /// See [`RouteSnapshot::next_domain`]; `Unavailable` before the first
    /// load.
    pub fn next_domain(&self, request: &NextDomainRequest) -> Result<NextDomain, LookupError> {
        let snapshot = self.acquire()?;
        snapshot.next_domain(request, &self.options)
    }

    /// Dump the live snapshot.
    ///
    /// # Errors
    ///
    /// `Unavailable` before the first load.
    pub fn dump(&self) -> Result<RouteDump, LookupError> {
        let snapshot = self.acquire()?;
        Ok(RouteDump::new(&snapshot))
    }

    /// Counts of the live snapshot.
    #[must_use]
    pub fn stats(&self) -> Option<SnapshotStats> {
        self.current.load().as_ref().map(|s| s.stats())
    }

    /// Build and fix up a fresh snapshot from the source without publishing
    /// it.
    ///
    /// # Errors
    ///
    /// The source's `LoadError` or the fixup's `FixupError`.
    pub fn load_snapshot(&self) -> Result<RouteSnapshot, ReloadError> {
        let mut builder = SnapshotBuilder::new(self.mode);
        self.source.load(&mut builder)?;
        if let Some(name) = &self.default_carrier {
            builder.set_default_carrier(name.clone());
        }
        Ok(builder.build()?)
    }

    /// Load a new snapshot from the source and publish it.
    ///
    /// A failed load leaves the live snapshot untouched.
    ///
    /// # Errors
    ///
    /// Any `ReloadError` from loading or fixup.
    pub fn reload(&self) -> Result<ReloadReport, ReloadError> {
        let started = Instant::now();
        let snapshot = match self.load_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(source = %self.source.describe(), error = %e, "route reload failed, keeping current routes");
                return Err(e);
            }
        };
        Ok(self.publish(snapshot, started.elapsed()))
    }

    /// Publish an already built snapshot.
    pub fn install(&self, snapshot: RouteSnapshot) -> ReloadReport {
        self.publish(snapshot, Duration::ZERO)
    }

    fn publish(&self, mut snapshot: RouteSnapshot, load_time: Duration) -> ReloadReport {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        snapshot.set_generation(generation);
        let stats = snapshot.stats();

        let snapshot = Arc::new(snapshot);
        snapshot.set_state(SnapshotState::Live);
        let previous = self.current.swap(Some(snapshot));

        info!(
            generation,
            carriers = stats.carriers,
            domains = stats.domains,
            rules = stats.rules,
            failure_rules = stats.failure_rules,
            load_time_us = micros(load_time),
            "routes published"
        );

        let drain_started = Instant::now();
        let drain = match previous {
            None => DrainOutcome::NothingToDrain,
            Some(old) => {
                old.set_state(SnapshotState::Superseded);
                self.drain(&old)
            }
        };

        ReloadReport {
            generation,
            load_time_us: micros(load_time),
            drain_time_us: micros(drain_started.elapsed()),
            drain,
            stats,
        }
    }

    fn drain(&self, old: &RouteSnapshot) -> DrainOutcome {
        let started = Instant::now();
        let mut backoff = self.drain.initial_backoff;
        let mut warned = false;

        loop {
            let readers = old.readers();
            if readers == 0 {
                old.set_state(SnapshotState::Reclaimed);
                debug!(generation = old.generation(), "superseded routes reclaimed");
                return DrainOutcome::Drained;
            }

            let waited = started.elapsed();
            if let Some(limit) = self.drain.give_up_after {
                if waited >= limit {
                    warn!(
                        generation = old.generation(),
                        readers,
                        waited_ms = waited.as_millis(),
                        "giving up waiting for readers of superseded routes"
                    );
                    return DrainOutcome::GaveUp { readers };
                }
            }
            if !warned && waited >= self.drain.warn_after {
                warn!(
                    generation = old.generation(),
                    readers,
                    waited_ms = waited.as_millis(),
                    "superseded routes still in use"
                );
                warned = true;
            }

            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(self.drain.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoadError;
    use crate::routing::hash::{HashInputs, HashSource};
    use crate::routing::{FailureRouteSpec, RouteSpec};
    use crate::source::FnSource;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Source whose single host changes with every load: gw1, gw2, ...
    fn counting_source() -> (Arc<AtomicUsize>, Arc<dyn RouteSource>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let source = FnSource::new(move |b| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let c = b.add_carrier("default");
            let d = b.add_domain(c, "proxy")?;
            b.add_route(RouteSpec::new(c, d, "1", format!("gw{n}")))
        });
        (loads, Arc::new(source))
    }

    fn request() -> RouteRequest {
        RouteRequest::new(0, "proxy", "123").with_hash(HashSource::CallId, HashInputs::with_call_id("x"))
    }

    #[test]
    fn test_unavailable_before_first_load() {
        let (_, source) = counting_source();
        let engine = RouteEngine::new(source);
        assert!(!engine.is_loaded());
        assert_eq!(engine.generation(), 0);
        assert_eq!(engine.route(&request()).unwrap_err(), LookupError::Unavailable);
        assert!(!engine.route(&request()).unwrap_err().is_miss());
    }

    #[test]
    fn test_reload_publishes_new_generation() {
        let (_, source) = counting_source();
        let engine = RouteEngine::new(source);

        let report = engine.reload().unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.drain, DrainOutcome::NothingToDrain);
        assert_eq!(report.stats.rules, 1);
        assert_eq!(engine.route(&request()).unwrap().host, "gw1");

        let report = engine.reload().unwrap();
        assert_eq!(report.generation, 2);
        assert_eq!(report.drain, DrainOutcome::Drained);
        assert_eq!(engine.route(&request()).unwrap().host, "gw2");
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let fail = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let source = FnSource::new(move |b| {
            if flag.load(Ordering::SeqCst) {
                return Err(LoadError::parse(3, "broken"));
            }
            let c = b.add_carrier("default");
            let d = b.add_domain(c, "proxy")?;
            b.add_route(RouteSpec::new(c, d, "1", "gw"))
        });
        let engine = RouteEngine::new(Arc::new(source));
        engine.reload().unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(engine.reload(), Err(ReloadError::Load(_))));
        assert_eq!(engine.generation(), 1);
        assert_eq!(engine.route(&request()).unwrap().host, "gw");
    }

    #[test]
    fn test_fixup_failure_keeps_current() {
        let broken = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&broken);
        let source = FnSource::new(move |b| {
            let c = b.add_carrier("default");
            let d = b.add_domain(c, "proxy")?;
            let mut spec = RouteSpec::new(c, d, "1", "gw");
            if flag.load(Ordering::SeqCst) {
                spec = spec.with_max_targets(2);
            }
            b.add_route(spec)
        });
        let engine = RouteEngine::new(Arc::new(source));
        engine.reload().unwrap();
        broken.store(true, Ordering::SeqCst);
        assert!(matches!(engine.reload(), Err(ReloadError::Fixup(_))));
        assert!(engine.route(&request()).is_ok());
    }

    #[test]
    fn test_short_reply_code_aborts_reload() {
        let source = FnSource::new(|b| {
            let c = b.add_carrier("default");
            let d = b.add_domain(c, "proxy")?;
            b.add_route(RouteSpec::new(c, d, "1", "gw"))?;
            b.add_failure_route(FailureRouteSpec::new(c, d, "1", d).with_reply_code("48"))
        });
        let engine = RouteEngine::new(Arc::new(source));
        assert!(matches!(
            engine.reload(),
            Err(ReloadError::Load(LoadError::InvalidReplyCode(_)))
        ));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_guard_held_across_reload_sees_old_snapshot() {
        let (_, source) = counting_source();
        let engine = RouteEngine::new(source).with_drain_policy(
            DrainPolicy::default().with_give_up_after(Duration::from_millis(20)),
        );
        engine.reload().unwrap();

        let guard = engine.acquire().unwrap();
        assert_eq!(guard.readers(), 1);

        let report = engine.reload().unwrap();
        assert_eq!(report.drain, DrainOutcome::GaveUp { readers: 1 });
        assert_eq!(engine.route(&request()).unwrap().host, "gw2");

        assert_eq!(guard.generation(), 1);
        assert_eq!(guard.state(), SnapshotState::Superseded);
        let old = guard.route(&request(), engine.options()).unwrap();
        assert_eq!(old.host, "gw1");

        let snapshot = Arc::clone(guard.snapshot());
        drop(guard);
        assert_eq!(snapshot.readers(), 0);
    }

    #[test]
    fn test_reload_waits_for_guard_release() {
        let (_, source) = counting_source();
        let engine = Arc::new(RouteEngine::new(source));
        engine.reload().unwrap();

        let guard = engine.acquire().unwrap();
        let old = Arc::clone(guard.snapshot());

        let writer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.reload().unwrap())
        };

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(old.state(), SnapshotState::Superseded);
        assert_eq!(guard.route(&request(), engine.options()).unwrap().host, "gw1");
        drop(guard);

        let report = writer.join().unwrap();
        assert_eq!(report.drain, DrainOutcome::Drained);
        assert_eq!(old.state(), SnapshotState::Reclaimed);
    }

    #[test]
    fn test_concurrent_lookups_during_reloads() {
        let (_, source) = counting_source();
        let engine = Arc::new(RouteEngine::new(source));
        engine.reload().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut lookups = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let guard = engine.acquire().unwrap();
                        let host = guard.route(&request(), engine.options()).unwrap().host;
                        assert_eq!(host, format!("gw{}", guard.generation()));
                        lookups += 1;
                    }
                    lookups
                })
            })
            .collect();

        for _ in 0..20 {
            engine.reload().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(engine.generation(), 21);
        assert_eq!(engine.acquire().unwrap().readers(), 1);
    }

    #[test]
    fn test_install_and_dump() {
        let (_, source) = counting_source();
        let engine = RouteEngine::new(source);
        let snapshot = engine.load_snapshot().unwrap();
        assert_eq!(snapshot.state(), SnapshotState::Staged);

        let report = engine.install(snapshot);
        assert_eq!(report.generation, 1);
        let dump = engine.dump().unwrap();
        assert_eq!(dump.generation, 1);
        assert_eq!(dump.carriers[0].domains[0].entries[0].host, "gw1");
        assert_eq!(engine.stats().unwrap().rules, 1);
    }

    #[test]
    fn test_default_carrier_override() {
        let source = FnSource::new(|b| {
            let a = b.add_carrier("a");
            let other = b.add_carrier("b");
            let d = b.add_domain(a, "proxy")?;
            b.add_route(RouteSpec::new(a, d, "", "gw-a"))?;
            let d = b.add_domain(other, "proxy")?;
            b.add_route(RouteSpec::new(other, d, "", "gw-b"))
        });
        let engine = RouteEngine::new(Arc::new(source)).with_default_carrier("b");
        engine.reload().unwrap();
        assert_eq!(engine.route(&request()).unwrap().host, "gw-b");
    }
}
