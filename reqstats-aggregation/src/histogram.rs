// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width latency histograms.
//!
//! Every bucket and every report-wide total carries a histogram of request (or timer) durations
//! so that percentile columns can be answered without keeping raw samples around. Unlike a
//! log-scale histogram, buckets here are linear: `N` buckets of equal width cover
//! `[0, max)`, and anything at or past `max` lands in the last bucket.
//!
//! Histograms support removal as well as insertion, since events leave the aggregation index
//! when they expire.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use reqstats_aggregation::{Histogram, HistogramLayout};
//!
//! let layout = HistogramLayout::new(Duration::from_secs(1), 10).unwrap();
//! let mut histogram = Histogram::new(layout);
//! histogram.record(Duration::from_millis(120), 1);
//! histogram.record(Duration::from_millis(450), 1);
//! histogram.record(Duration::from_secs(30), 1); // clamped to the last bucket
//!
//! assert_eq!(histogram.total(), 3);
//! assert_eq!(histogram.median(), Duration::from_millis(500));
//! ```

use std::{ops::Range, time::Duration};

use crate::DefinitionError;

/// Bucket count and span of a [`Histogram`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HistogramLayout {
    max: Duration,
    buckets: u32,
}

impl Default for HistogramLayout {
    fn default() -> Self {
        Self {
            max: Self::DEFAULT_MAX,
            buckets: Self::DEFAULT_BUCKETS,
        }
    }
}

impl HistogramLayout {
    /// Default upper edge.
    pub const DEFAULT_MAX: Duration = Duration::from_secs(10);
    /// Default number of buckets.
    pub const DEFAULT_BUCKETS: u32 = 512;

    /// `buckets` equal-width buckets spanning `[0, max)`.
    pub fn new(max: Duration, buckets: u32) -> Result<Self, DefinitionError> {
        if buckets == 0 || max.as_nanos() < u128::from(buckets) {
            return Err(DefinitionError::InvalidHistogram { max, buckets });
        }
        Ok(Self { max, buckets })
    }

    /// Upper edge of the covered range.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Number of buckets.
    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Width of one bucket.
    pub fn bucket_width(&self) -> Duration {
        self.max / self.buckets
    }

    /// Index of the bucket `value` falls into.
    pub fn bucket_of(&self, value: Duration) -> usize {
        let last = u128::from(self.buckets - 1);
        let width = self.bucket_width().as_nanos().max(1);
        (value.as_nanos() / width).min(last) as usize
    }

    /// The range of durations covered by `bucket`. The last bucket is open-ended in practice,
    /// but reports `max` as its end.
    pub fn bucket_range(&self, bucket: usize) -> Range<Duration> {
        let width = self.bucket_width();
        let start = width * bucket as u32;
        let end = if bucket + 1 >= self.buckets as usize {
            self.max
        } else {
            width * (bucket as u32 + 1)
        };
        start..end
    }
}

/// Linear histogram of durations with weighted insert and remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    layout: HistogramLayout,
    counts: Box<[u64]>,
    total: u64,
}

impl Histogram {
    /// An empty histogram.
    pub fn new(layout: HistogramLayout) -> Self {
        Self {
            layout,
            counts: vec![0; layout.buckets as usize].into_boxed_slice(),
            total: 0,
        }
    }

    /// The layout this histogram was built with.
    pub fn layout(&self) -> HistogramLayout {
        self.layout
    }

    /// Record `weight` observations of `value`.
    pub fn record(&mut self, value: Duration, weight: u32) {
        let bucket = self.layout.bucket_of(value);
        self.counts[bucket] += u64::from(weight);
        self.total += u64::from(weight);
    }

    /// Take back `weight` observations of `value`. Returns `false`, leaving the histogram
    /// untouched, if that many observations aren't there.
    pub fn unrecord(&mut self, value: Duration, weight: u32) -> bool {
        let bucket = self.layout.bucket_of(value);
        let weight = u64::from(weight);
        match self.counts[bucket].checked_sub(weight) {
            Some(left) => {
                self.counts[bucket] = left;
                self.total -= weight;
                true
            }
            None => false,
        }
    }

    /// Take back a batch of observations, all or nothing.
    pub fn unrecord_all(&mut self, samples: &[(Duration, u32)]) -> bool {
        for (done, &(value, weight)) in samples.iter().enumerate() {
            if !self.unrecord(value, weight) {
                for &(value, weight) in &samples[..done] {
                    self.record(value, weight);
                }
                return false;
            }
        }
        true
    }

    /// Total number of observations.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Per-bucket counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Non-empty buckets with the durations they cover.
    pub fn buckets(&self) -> impl Iterator<Item = (Range<Duration>, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(bucket, &count)| (self.layout.bucket_range(bucket), count))
    }

    /// Estimate the `rank`-th smallest observation (1-based) as the upper edge of the bucket
    /// holding it. Ranks below 1 and above [`Self::total`] are clamped; an empty histogram
    /// reports zero.
    pub fn value_at_rank(&self, rank: u64) -> Duration {
        if self.total == 0 {
            return Duration::ZERO;
        }
        let target = rank.clamp(1, self.total);
        let mut seen = 0;
        for (bucket, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return self.layout.bucket_range(bucket).end;
            }
        }
        self.layout.max
    }

    /// Estimate the `percentile`-th percentile, `percentile` in `[0, 100]`.
    pub fn percentile(&self, percentile: f64) -> Duration {
        let fraction = (percentile / 100.0).clamp(0.0, 1.0);
        let rank = (fraction * self.total as f64).ceil() as u64;
        self.value_at_rank(rank)
    }

    /// Estimate the median.
    pub fn median(&self) -> Duration {
        self.percentile(50.0)
    }
}
