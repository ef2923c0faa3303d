// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use crossbeam_queue::ArrayQueue;
use reqstats_aggregation::{AggregationIndex, HistogramLayout, ReportFilter};
use reqstats_core::{IncomingRequest, RequestId};

use crate::{
    BASE_REPORTS, Clock, ConfigError, EngineConfig, EventPool, LookupError, PoolStats, Report,
    ReportDefinition, ReportHandle, RequestSnapshot,
    lock::{read, write},
    metrics,
    pool::Views,
    rate_limit::throttled,
    registry::Registry,
};

/// What one [`Engine::merge_now`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// requests moved from staging into the pool
    pub appended: usize,
    /// staged requests dropped because their arrays didn't agree
    pub malformed: usize,
    /// requests that aged out of the retention window
    pub expired: usize,
    /// requests evicted, or never pooled, because the pool was full
    pub force_evicted: usize,
    /// on-demand reports torn down for being idle
    pub swept: usize,
}

/// Counters and gauges describing an [`Engine`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// requests accepted into the pool since startup
    pub accepted: u64,
    /// requests dropped for being malformed since startup
    pub malformed: u64,
    /// requests dropped from a full staging queue since startup
    pub staging_dropped: u64,
    /// requests lost to a full pool since startup
    pub force_evicted: u64,
    /// requests that aged out since startup
    pub expired: u64,
    /// on-demand reports torn down since startup
    pub swept_reports: u64,
    /// requests waiting for the next merge
    pub staged: usize,
    /// pool occupancy
    pub pool: PoolStats,
    /// number of base reports
    pub base_reports: usize,
    /// number of live on-demand reports
    pub on_demand_reports: usize,
    /// arrival times of the oldest and newest pooled request
    pub live_interval: Option<(SystemTime, SystemTime)>,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    malformed: AtomicU64,
    staging_dropped: AtomicU64,
    force_evicted: AtomicU64,
    expired: AtomicU64,
    swept_reports: AtomicU64,
}

impl Counters {
    fn record(&self, engine: &str, summary: &MergeSummary) {
        let add = |counter: &AtomicU64, metric: Option<&'static str>, n: usize| {
            if n > 0 {
                counter.fetch_add(n as u64, Ordering::Relaxed);
                if let Some(metric) = metric {
                    metrics::increment_counter(metric, engine, n as u64);
                }
            }
        };
        add(&self.accepted, Some(metrics::ACCEPTED), summary.appended);
        add(&self.malformed, Some(metrics::MALFORMED), summary.malformed);
        add(&self.expired, Some(metrics::EXPIRED), summary.expired);
        add(&self.force_evicted, Some(metrics::FORCE_EVICTED), summary.force_evicted);
        add(&self.swept_reports, None, summary.swept);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Update {
    Add,
    Remove,
}

/// The rollup engine: an event pool covering the retention window, and the reports aggregated
/// over it.
///
/// Requests are [submitted](Engine::submit) into a bounded staging queue and only become
/// visible once [`Engine::merge_now`] moves them into the pool. A [`Driver`](crate::Driver)
/// calls it periodically; tests usually call it directly.
///
/// Locks are always taken in the order pool, registry, report, and report readers only ever
/// hold one report's lock, so lookups and report reads never wait on each other for long.
pub struct Engine {
    config: EngineConfig,
    clock: Clock,
    layout: HistogramLayout,
    staging: ArrayQueue<IncomingRequest>,
    pool: RwLock<EventPool>,
    registry: RwLock<Registry>,
    counters: Counters,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("staged", &self.staging.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine reading the system clock.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Clock::System)
    }

    /// An engine reading `clock`.
    pub fn with_clock(config: EngineConfig, clock: Clock) -> Result<Self, ConfigError> {
        config.validate()?;
        let layout = config.histogram_layout()?;
        let now = clock.now();
        let base = BASE_REPORTS
            .iter()
            .map(|base| {
                let index = AggregationIndex::new(base.grouping(), ReportFilter::default(), layout)
                    .map_err(ConfigError::Histogram)?;
                let definition = ReportDefinition::from_base(base);
                Ok(Arc::new(Report::new(definition, index, now)))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        tracing::debug!(?config, reports = base.len(), "engine created");
        Ok(Self {
            staging: ArrayQueue::new(config.staging_capacity),
            pool: RwLock::new(EventPool::new(&config)),
            registry: RwLock::new(Registry::new(base)),
            counters: Counters::default(),
            layout,
            clock,
            config,
        })
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Queue `request` for the next merge. Never blocks. If the staging queue is full, the
    /// oldest staged request is dropped to make room.
    pub fn submit(&self, request: IncomingRequest) {
        if self.staging.force_push(request).is_some() {
            self.counters.staging_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::increment_counter(metrics::STAGING_DROPPED, &self.config.name, 1);
            throttled!(Duration::from_secs(1), |suppressed| tracing::error!(
                suppressed,
                "staging queue has fallen behind, requests will be missing"
            ));
        }
    }

    /// Number of requests waiting for the next merge.
    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Apply retention, move staged requests into the pool and update every report, then tear
    /// down idle on-demand reports.
    ///
    /// Staged requests all get the current time as their arrival time.
    pub fn merge_now(&self) -> MergeSummary {
        let now = self.clock.now();
        let mut summary = MergeSummary::default();
        let mut pool = write(&self.pool);
        let reports = read(&self.registry).all();

        if let Some(cutoff) = now.checked_sub(self.config.retention_window()) {
            let expired = pool.count_older_than(cutoff);
            if expired > 0 {
                self.update(&reports, pool.oldest(expired), Update::Remove);
                summary.expired = pool.discard_oldest(expired);
            }
        }

        // at most one queue's worth per merge
        let mut batch = Vec::new();
        for _ in 0..self.staging.capacity() {
            let Some(request) = self.staging.pop() else {
                break;
            };
            match request.validate() {
                Ok(()) => batch.push(request),
                Err(err) => {
                    summary.malformed += 1;
                    throttled!(Duration::from_secs(1), |suppressed| tracing::warn!(
                        %err,
                        suppressed,
                        script = request.script_name.as_str(),
                        "dropping malformed request"
                    ));
                }
            }
        }

        let capacity = pool.capacity();
        if batch.len() > capacity {
            let lost = batch.len() - capacity;
            batch.drain(..lost);
            summary.force_evicted += lost;
        }
        let room = capacity - pool.len().min(capacity);
        if batch.len() > room {
            let evict = batch.len() - room;
            self.update(&reports, pool.oldest(evict), Update::Remove);
            summary.force_evicted += pool.discard_oldest(evict);
        }
        if summary.force_evicted > 0 {
            let evicted = summary.force_evicted;
            throttled!(Duration::from_secs(1), |suppressed| tracing::warn!(
                evicted,
                suppressed,
                "request pool is full, evicting requests before they expire"
            ));
        }

        let first_new = pool.len();
        for request in &batch {
            match pool.append(request, now) {
                Ok(_) => summary.appended += 1,
                Err(err) => {
                    summary.malformed += 1;
                    tracing::debug!(%err, "request not pooled");
                }
            }
        }
        if summary.appended > 0 {
            self.update(&reports, pool.from_position(first_new), Update::Add);
        }
        drop(pool);

        summary.swept = self.sweep_idle_at(now);
        self.counters.record(&self.config.name, &summary);
        if summary != MergeSummary::default() {
            tracing::debug!(?summary, "merged");
        }
        summary
    }

    fn update(&self, reports: &[ReportHandle], requests: Views<'_>, update: Update) {
        let threads = self.config.report_parallelism.min(reports.len());
        if threads <= 1 {
            for report in reports {
                apply(report, requests.clone(), update);
            }
            return;
        }
        let per_thread = reports.len().div_ceil(threads);
        std::thread::scope(|scope| {
            for chunk in reports.chunks(per_thread) {
                let requests = requests.clone();
                scope.spawn(move || {
                    for report in chunk {
                        apply(report, requests.clone(), update);
                    }
                });
            }
        });
    }

    /// Tear down on-demand reports not looked up within the idle timeout. Returns how many were
    /// torn down.
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(self.clock.now())
    }

    fn sweep_idle_at(&self, now: SystemTime) -> usize {
        let Some(timeout) = self.config.idle_timeout() else {
            return 0;
        };
        let swept = write(&self.registry).sweep_idle(now, timeout);
        for report in &swept {
            tracing::info!(report = report.id(), "tearing down idle report");
        }
        swept.len()
    }

    /// Look up a report by id, creating it if it doesn't exist yet. Creating a report backfills
    /// it from every pooled request, so it is immediately consistent with the pool.
    ///
    /// Every lookup counts as a use for the idle timeout.
    pub fn report_lookup(&self, id: &str) -> Result<ReportHandle, LookupError> {
        if let Some(report) = read(&self.registry).get(id) {
            report.touch(self.clock.now());
            return Ok(Arc::clone(report));
        }
        let definition: ReportDefinition = id.parse()?;
        self.report(&definition)
    }

    /// Like [`Engine::report_lookup`], for an already parsed definition.
    pub fn report(&self, definition: &ReportDefinition) -> Result<ReportHandle, LookupError> {
        let id = definition.canonical_id();
        if let Some(report) = read(&self.registry).get(&id) {
            report.touch(self.clock.now());
            return Ok(Arc::clone(report));
        }

        let pool = read(&self.pool);
        let mut registry = write(&self.registry);
        let now = self.clock.now();
        // someone else may have created it while we waited
        if let Some(report) = registry.get(&id) {
            report.touch(now);
            return Ok(Arc::clone(report));
        }
        let grouping = definition.grouping(pool.tags())?;
        let index = AggregationIndex::new(grouping, definition.filter().clone(), self.layout)?;
        let report = Arc::new(Report::new(definition.clone(), index, now));
        apply(&report, pool.iter(), Update::Add);
        tracing::info!(
            report = report.id(),
            buckets = report.len(),
            backfilled = pool.len(),
            "created report"
        );
        registry.insert(Arc::clone(&report));
        Ok(report)
    }

    /// Every live report, base reports first.
    pub fn reports(&self) -> Vec<ReportHandle> {
        read(&self.registry).all()
    }

    /// The oldest pooled request.
    pub fn pool_iterate_first(&self) -> Option<RequestSnapshot> {
        read(&self.pool).next_after(None).map(RequestSnapshot::from)
    }

    /// The oldest pooled request that arrived after `cursor`. Requests evicted in between are
    /// skipped.
    pub fn pool_iterate_next(&self, cursor: RequestId) -> Option<RequestSnapshot> {
        read(&self.pool)
            .next_after(Some(cursor))
            .map(RequestSnapshot::from)
    }

    /// Run `f` with read access to the pool, e.g. to read several [`EventPool`] figures
    /// consistently with each other.
    ///
    /// Merges wait until `f` returns, and `f` must not call back into the engine.
    pub fn with_pool<R>(&self, f: impl FnOnce(&EventPool) -> R) -> R {
        f(&read(&self.pool))
    }

    /// Arrival times of the oldest and newest pooled request.
    pub fn live_interval(&self) -> Option<(SystemTime, SystemTime)> {
        read(&self.pool).time_range()
    }

    /// Current counters and gauges.
    pub fn stats(&self) -> EngineStats {
        let pool = read(&self.pool);
        let registry = read(&self.registry);
        let counter = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        EngineStats {
            accepted: counter(&self.counters.accepted),
            malformed: counter(&self.counters.malformed),
            staging_dropped: counter(&self.counters.staging_dropped),
            force_evicted: counter(&self.counters.force_evicted),
            expired: counter(&self.counters.expired),
            swept_reports: counter(&self.counters.swept_reports),
            staged: self.staging.len(),
            pool: pool.stats(),
            base_reports: registry.base_len(),
            on_demand_reports: registry.on_demand_len(),
            live_interval: pool.time_range(),
        }
    }
}

fn apply(report: &Report, requests: Views<'_>, update: Update) {
    let mut index = report.write();
    for request in requests {
        let _ = match update {
            Update::Add => index.add(&request),
            Update::Remove => index.remove(&request),
        };
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use assert2::{check, let_assert};
    use reqstats_core::GroupKey;

    use super::*;
    use crate::clock::fakes::ManualClock;

    fn engine(config: EngineConfig) -> (Engine, ManualClock) {
        let clock = ManualClock::at(UNIX_EPOCH + Duration::from_secs(1_000_000));
        let engine = Engine::with_clock(config, Clock::custom(clock.clone())).unwrap();
        (engine, clock)
    }

    fn request(script: &str, ms: u64) -> IncomingRequest {
        IncomingRequest::builder(script)
            .hostname("web1")
            .request_time(Duration::from_millis(ms))
            .build()
    }

    #[test]
    fn base_reports_exist_from_the_start() {
        let (engine, _) = engine(EngineConfig::default());
        let ids: Vec<_> = engine.reports().iter().map(|r| r.id().to_owned()).collect();
        let expected: Vec<_> = BASE_REPORTS.iter().map(|b| b.id()).collect();
        check!(ids == expected);
        check!(engine.stats().base_reports == BASE_REPORTS.len());
    }

    #[test]
    fn submissions_wait_for_a_merge() {
        let (engine, _) = engine(EngineConfig::default());
        engine.submit(request("a.php", 5));
        check!(engine.staged() == 1);
        check!(engine.report_lookup("info").unwrap().totals().count() == 0);

        let summary = engine.merge_now();
        check!(summary.appended == 1);
        check!(engine.staged() == 0);
        check!(engine.report_lookup("info").unwrap().totals().count() == 1);
    }

    #[test]
    fn full_staging_drops_the_oldest() {
        let (engine, _) = engine(EngineConfig::new().staging_capacity(2));
        for script in ["a.php", "b.php", "c.php"] {
            engine.submit(request(script, 1));
        }
        engine.merge_now();
        let by_script = engine.report_lookup("by_script").unwrap();
        check!(by_script.bucket(&GroupKey::flat("a.php")).is_none());
        check!(by_script.bucket(&GroupKey::flat("c.php")).is_some());
        check!(engine.stats().staging_dropped == 1);
    }

    #[test]
    fn parallel_updates_match_serial_ones() {
        let (serial, _) = engine(EngineConfig::default());
        let (parallel, _) = engine(EngineConfig::new().report_parallelism(4));
        for engine in [&serial, &parallel] {
            for i in 0..50 {
                engine.submit(request(&format!("{}.php", i % 7), i));
            }
            engine.merge_now();
        }
        for (a, b) in serial.reports().iter().zip(parallel.reports()) {
            check!(a.id() == b.id());
            check!(a.totals() == b.totals());
            check!(a.len() == b.len());
        }
    }

    #[test]
    fn lookups_share_one_report() {
        let (engine, _) = engine(EngineConfig::default());
        let a = engine.report_lookup("by_host?min=10&max=20").unwrap();
        let b = engine.report_lookup("by_host?max=20&min=10").unwrap();
        check!(Arc::ptr_eq(&a, &b));
        check!(engine.stats().on_demand_reports == 1);

        let_assert!(Err(LookupError::UnknownTag(_)) = engine.report_lookup("tag_info:nope"));
        check!(engine.stats().on_demand_reports == 1);
    }
}
