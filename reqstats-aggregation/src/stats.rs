// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use reqstats_core::RequestId;
use smallvec::SmallVec;

use crate::{Histogram, HistogramLayout};

/// Running sums kept per bucket and per report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of requests. A request counts once per bucket no matter how many of its timers
    /// landed there.
    pub count: u64,
    /// Number of hits. For timer-tag reports this sums timer hit counts, otherwise it equals
    /// `count`.
    pub hit_count: u64,
    /// summed request (or timer) time
    pub req_time: Duration,
    /// summed user CPU time
    pub ru_utime: Duration,
    /// summed system CPU time
    pub ru_stime: Duration,
    /// summed response size in bytes
    pub doc_size: u64,
    /// summed memory footprint in bytes
    pub memory_footprint: u64,
}

impl Stats {
    pub(crate) fn add(&mut self, other: &Stats) {
        self.count += other.count;
        self.hit_count += other.hit_count;
        self.req_time = self.req_time.saturating_add(other.req_time);
        self.ru_utime = self.ru_utime.saturating_add(other.ru_utime);
        self.ru_stime = self.ru_stime.saturating_add(other.ru_stime);
        self.doc_size = self.doc_size.saturating_add(other.doc_size);
        self.memory_footprint = self.memory_footprint.saturating_add(other.memory_footprint);
    }

    pub(crate) fn checked_sub(&self, other: &Stats) -> Option<Stats> {
        Some(Stats {
            count: self.count.checked_sub(other.count)?,
            hit_count: self.hit_count.checked_sub(other.hit_count)?,
            req_time: self.req_time.checked_sub(other.req_time)?,
            ru_utime: self.ru_utime.checked_sub(other.ru_utime)?,
            ru_stime: self.ru_stime.checked_sub(other.ru_stime)?,
            doc_size: self.doc_size.checked_sub(other.doc_size)?,
            memory_footprint: self.memory_footprint.checked_sub(other.memory_footprint)?,
        })
    }

    /// True if every field is zero.
    pub fn is_zero(&self) -> bool {
        *self == Stats::default()
    }
}

/// What one request adds to one bucket: its sums plus the histogram samples that go with them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Delta {
    pub(crate) stats: Stats,
    pub(crate) samples: SmallVec<[(Duration, u32); 1]>,
}

impl Delta {
    pub(crate) fn merge(&mut self, other: Delta) {
        // both deltas come from the same request, so it still counts once
        let count = self.stats.count.max(other.stats.count);
        self.stats.add(&other.stats);
        self.stats.count = count;
        self.samples.extend(other.samples);
    }
}

#[derive(Debug)]
pub(crate) struct Underflow;

/// Sums plus histogram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregate {
    stats: Stats,
    histogram: Histogram,
}

impl Aggregate {
    pub(crate) fn new(layout: HistogramLayout) -> Self {
        Self {
            stats: Stats::default(),
            histogram: Histogram::new(layout),
        }
    }

    /// The running sums.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Number of requests.
    pub fn count(&self) -> u64 {
        self.stats.count
    }

    /// The latency histogram.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Shorthand for [`Histogram::value_at_rank`].
    pub fn value_at_rank(&self, rank: u64) -> Duration {
        self.histogram.value_at_rank(rank)
    }

    /// True if nothing is accounted.
    pub fn is_empty(&self) -> bool {
        self.stats.is_zero() && self.histogram.is_empty()
    }

    pub(crate) fn apply(&mut self, stats: &Stats, samples: &[(Duration, u32)]) {
        self.stats.add(stats);
        for &(value, weight) in samples {
            self.histogram.record(value, weight);
        }
    }

    /// All or nothing.
    pub(crate) fn retract(
        &mut self,
        stats: &Stats,
        samples: &[(Duration, u32)],
    ) -> Result<(), Underflow> {
        let left = self.stats.checked_sub(stats).ok_or(Underflow)?;
        if !self.histogram.unrecord_all(samples) {
            return Err(Underflow);
        }
        self.stats = left;
        Ok(())
    }

    pub(crate) fn retract_all(&mut self, other: &Aggregate) -> Result<(), Underflow> {
        let samples: SmallVec<[(Duration, u32); 8]> = other
            .histogram
            .buckets()
            .map(|(range, count)| (range.start, u32::try_from(count).unwrap_or(u32::MAX)))
            .collect();
        self.retract(&other.stats, &samples)
    }
}

/// The aggregate for one grouping key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    aggregate: Aggregate,
    values: SmallVec<[Box<str>; 3]>,
    last_add: Option<RequestId>,
    last_remove: Option<RequestId>,
}

impl Bucket {
    pub(crate) fn new(layout: HistogramLayout, values: SmallVec<[Box<str>; 3]>) -> Self {
        Self {
            aggregate: Aggregate::new(layout),
            values,
            last_add: None,
            last_remove: None,
        }
    }

    /// Sums and histogram.
    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// The running sums.
    pub fn stats(&self) -> &Stats {
        self.aggregate.stats()
    }

    /// Number of requests.
    pub fn count(&self) -> u64 {
        self.aggregate.count()
    }

    /// The latency histogram.
    pub fn histogram(&self) -> &Histogram {
        self.aggregate.histogram()
    }

    /// The grouping values this bucket stands for, copied out of the first request that created
    /// it.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| &**v)
    }

    /// The most recent request added.
    pub fn last_added(&self) -> Option<RequestId> {
        self.last_add
    }

    /// The most recent request removed.
    pub fn last_removed(&self) -> Option<RequestId> {
        self.last_remove
    }

    /// Apply `delta` for request `id`. Returns the stats actually applied, which differ from
    /// `delta` in `count` if the request was already counted here.
    pub(crate) fn add(&mut self, id: RequestId, delta: &Delta) -> Stats {
        let mut stats = delta.stats.clone();
        if self.last_add == Some(id) {
            stats.count = 0;
        }
        self.last_add = Some(id);
        self.aggregate.apply(&stats, &delta.samples);
        stats
    }

    /// Take back `delta` for request `id`. Returns the stats actually taken back.
    pub(crate) fn remove(&mut self, id: RequestId, delta: &Delta) -> Result<Stats, Underflow> {
        let mut stats = delta.stats.clone();
        if self.last_remove == Some(id) {
            stats.count = 0;
        }
        self.aggregate.retract(&stats, &delta.samples)?;
        self.last_remove = Some(id);
        Ok(stats)
    }

    pub(crate) fn into_aggregate(self) -> Aggregate {
        self.aggregate
    }
}
