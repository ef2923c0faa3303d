// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqstats_aggregation::{Aggregate, AggregationIndex, Bucket, BucketRef};
use reqstats_core::GroupKey;

use crate::{ReportDefinition, lock};

/// A shared handle to a live report. Handles stay usable after the report is torn down, they
/// just stop receiving updates.
pub type ReportHandle = Arc<Report>;

/// A report: an [`AggregationIndex`] kept up to date with the event pool.
///
/// Readers take the report's read lock for the duration of one call, so every method sees a
/// consistent state but two consecutive calls may straddle a merge. Use [`Report::read`] to look
/// at several buckets under one lock.
pub struct Report {
    id: Box<str>,
    definition: ReportDefinition,
    index: RwLock<AggregationIndex>,
    created: SystemTime,
    // nanoseconds since UNIX_EPOCH
    last_requested: AtomicU64,
}

impl fmt::Debug for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("id", &self.id)
            .field("created", &self.created)
            .field("last_requested", &self.last_requested())
            .finish_non_exhaustive()
    }
}

fn nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn owned(bucket: BucketRef<'_>) -> (GroupKey, Bucket) {
    (bucket.group_key(), bucket.bucket().clone())
}

impl Report {
    pub(crate) fn new(definition: ReportDefinition, index: AggregationIndex, now: SystemTime) -> Self {
        Self {
            id: definition.canonical_id().into(),
            definition,
            index: RwLock::new(index),
            created: now,
            last_requested: AtomicU64::new(nanos(now)),
        }
    }

    /// Canonical report id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// What the report aggregates.
    pub fn definition(&self) -> &ReportDefinition {
        &self.definition
    }

    /// When the report was created.
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// When the report was last looked up. On-demand reports are torn down once this is older
    /// than the configured idle timeout.
    pub fn last_requested(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_requested.load(Ordering::Relaxed))
    }

    pub(crate) fn touch(&self, now: SystemTime) {
        self.last_requested.fetch_max(nanos(now), Ordering::Relaxed);
    }

    pub(crate) fn idle_since(&self, cutoff: SystemTime) -> bool {
        self.last_requested.load(Ordering::Relaxed) < nanos(cutoff)
    }

    /// Read access to the whole index.
    ///
    /// Merges wait for the guard while holding the pool, so drop it before calling back into
    /// the [`Engine`](crate::Engine) or the calls can deadlock.
    pub fn read(&self) -> RwLockReadGuard<'_, AggregationIndex> {
        lock::read(&self.index)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, AggregationIndex> {
        lock::write(&self.index)
    }

    /// The first bucket in key order.
    pub fn iterate_first(&self) -> Option<(GroupKey, Bucket)> {
        self.read().first().map(owned)
    }

    /// The first bucket whose key sorts after `cursor`. `cursor` doesn't have to exist anymore,
    /// so a caller can page through a report while merges keep changing it.
    pub fn iterate_next(&self, cursor: &GroupKey) -> Option<(GroupKey, Bucket)> {
        self.read().next_after(cursor).map(owned)
    }

    /// The bucket stored under `key`.
    pub fn bucket(&self, key: &GroupKey) -> Option<Bucket> {
        self.read().get(key).cloned()
    }

    /// Report-wide totals over every request the filter accepted.
    pub fn totals(&self) -> Aggregate {
        self.read().totals().clone()
    }

    /// Request time at `rank` (1-based) in the report-wide histogram.
    pub fn histogram_value_at_rank(&self, rank: u64) -> Duration {
        self.read().totals().value_at_rank(rank)
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if the report has no buckets.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use reqstats_aggregation::HistogramLayout;
    use reqstats_core::{Interner, TagId};

    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn empty_report(id: &str, now: SystemTime) -> Report {
        let definition: ReportDefinition = id.parse().unwrap();
        let grouping = definition.grouping(&Interner::<TagId>::new()).unwrap();
        let index =
            AggregationIndex::new(grouping, definition.filter().clone(), HistogramLayout::default())
                .unwrap();
        Report::new(definition, index, now)
    }

    #[test]
    fn touch_never_moves_backwards() {
        let report = empty_report("by_script?min=5", at(100));
        check!(report.id() == "by_script?min=5");
        check!(report.last_requested() == at(100));

        report.touch(at(150));
        report.touch(at(120));
        check!(report.last_requested() == at(150));
        check!(report.created() == at(100));
        check!(report.idle_since(at(151)));
        check!(!report.idle_since(at(150)));
    }

    #[test]
    fn empty_report_reads() {
        let report = empty_report("by_host", at(1));
        check!(report.is_empty());
        check!(report.iterate_first().is_none());
        check!(report.iterate_next(&GroupKey::flat("x")).is_none());
        check!(report.totals().count() == 0);
        check!(report.histogram_value_at_rank(1) == Duration::ZERO);
    }
}
