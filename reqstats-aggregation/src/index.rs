// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::BTreeMap, ops::Bound};

use itertools::Itertools;
use reqstats_core::{GroupKey, RequestView};

use crate::{
    Aggregate, Bucket, DefinitionError, Grouping, HistogramLayout, ReportFilter, stats::Delta,
};

type Level = BTreeMap<Box<str>, Bucket>;

#[derive(Debug)]
enum Storage {
    Totals,
    Flat(Level),
    Nested(BTreeMap<Box<str>, Level>),
}

impl Storage {
    fn for_grouping(grouping: &Grouping) -> Self {
        if grouping.is_totals() {
            Storage::Totals
        } else if grouping.is_nested() {
            Storage::Nested(BTreeMap::new())
        } else {
            Storage::Flat(BTreeMap::new())
        }
    }

    fn get(&self, key: &GroupKey) -> Option<&Bucket> {
        match self {
            Storage::Totals => None,
            Storage::Flat(level) => level.get(key.inner()),
            Storage::Nested(outer) => outer.get(key.outer().unwrap_or_default())?.get(key.inner()),
        }
    }

    fn get_mut(&mut self, key: &GroupKey) -> Option<&mut Bucket> {
        match self {
            Storage::Totals => None,
            Storage::Flat(level) => level.get_mut(key.inner()),
            Storage::Nested(outer) => outer
                .get_mut(key.outer().unwrap_or_default())?
                .get_mut(key.inner()),
        }
    }

    /// Returns the bucket and whether it was just created.
    fn entry(&mut self, key: GroupKey, layout: HistogramLayout) -> Option<(&mut Bucket, bool)> {
        let level = match self {
            Storage::Totals => return None,
            Storage::Flat(level) => level,
            Storage::Nested(levels) => {
                let outer = key.outer().unwrap_or_default();
                if !levels.contains_key(outer) {
                    levels.insert(outer.into(), Level::new());
                }
                levels.get_mut(outer)?
            }
        };
        if level.contains_key(key.inner()) {
            return level.get_mut(key.inner()).map(|bucket| (bucket, false));
        }
        // copy the grouping values out so the bucket outlives the request that created it
        let values = key.values().map(|v| Box::<str>::from(v.as_ref())).collect();
        let (_, inner) = key.into_parts();
        Some((level.entry(inner).or_insert(Bucket::new(layout, values)), true))
    }

    fn remove(&mut self, key: &GroupKey) -> Option<Bucket> {
        match self {
            Storage::Totals => None,
            Storage::Flat(level) => level.remove(key.inner()),
            Storage::Nested(levels) => {
                let outer = key.outer().unwrap_or_default();
                let level = levels.get_mut(outer)?;
                let bucket = level.remove(key.inner());
                if level.is_empty() {
                    levels.remove(outer);
                }
                bucket
            }
        }
    }
}

/// A bucket together with its position in the index.
#[derive(Clone, Copy, Debug)]
pub struct BucketRef<'a> {
    outer: Option<&'a str>,
    key: &'a str,
    bucket: &'a Bucket,
}

impl<'a> BucketRef<'a> {
    /// Outer key, for two-level reports.
    pub fn outer(&self) -> Option<&'a str> {
        self.outer
    }

    /// Bucket key within its level.
    pub fn key(&self) -> &'a str {
        self.key
    }

    /// The bucket.
    pub fn bucket(&self) -> &'a Bucket {
        self.bucket
    }

    /// Owned key, usable as a cursor for [`AggregationIndex::next_after`].
    pub fn group_key(&self) -> GroupKey {
        match self.outer {
            Some(outer) => GroupKey::nested(outer, self.key),
            None => GroupKey::flat(self.key),
        }
    }
}

fn flat_refs(level: &Level) -> impl Iterator<Item = BucketRef<'_>> {
    level.iter().map(|(key, bucket)| BucketRef {
        outer: None,
        key,
        bucket,
    })
}

fn nested_refs<'a>(outer: &'a str, level: &'a Level) -> impl Iterator<Item = BucketRef<'a>> {
    level.iter().map(move |(key, bucket)| BucketRef {
        outer: Some(outer),
        key,
        bucket,
    })
}

/// Ordered, incrementally maintained aggregate of the requests matching one report.
///
/// Each request is broken into `(key, delta)` contributions by the [`Grouping`]. Contributions
/// of a request that share a key are merged first, so a request is counted at most once per
/// bucket while every matching timer still adds its hits and time. The report totals move by
/// exactly what the buckets move by, so the bucket counts always add up to the total count.
///
/// A bucket exists exactly as long as its count is nonzero.
#[derive(Debug)]
pub struct AggregationIndex {
    grouping: Grouping,
    filter: ReportFilter,
    layout: HistogramLayout,
    totals: Aggregate,
    storage: Storage,
    buckets: usize,
    scratch: Vec<(Option<GroupKey>, Delta)>,
}

impl AggregationIndex {
    /// An empty index.
    pub fn new(
        grouping: Grouping,
        filter: ReportFilter,
        layout: HistogramLayout,
    ) -> Result<Self, DefinitionError> {
        filter.validate()?;
        Ok(Self {
            storage: Storage::for_grouping(&grouping),
            grouping,
            filter,
            layout,
            totals: Aggregate::new(layout),
            buckets: 0,
            scratch: Vec::new(),
        })
    }

    /// The grouping strategy.
    pub fn grouping(&self) -> &Grouping {
        &self.grouping
    }

    /// The report conditions.
    pub fn filter(&self) -> &ReportFilter {
        &self.filter
    }

    /// Histogram layout used for every bucket.
    pub fn layout(&self) -> HistogramLayout {
        self.layout
    }

    /// Report-wide totals.
    pub fn totals(&self) -> &Aggregate {
        &self.totals
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets
    }

    /// True if there are no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets == 0
    }

    fn contributions(&mut self, request: &RequestView<'_>) -> Vec<(Option<GroupKey>, Delta)> {
        let mut out = std::mem::take(&mut self.scratch);
        out.clear();
        self.grouping.contributions(request, &mut out);
        if out.len() > 1 {
            out.sort_by(|a, b| a.0.cmp(&b.0));
            out = out
                .into_iter()
                .coalesce(|mut a, b| {
                    if a.0 == b.0 {
                        a.1.merge(b.1);
                        Ok(a)
                    } else {
                        Err((a, b))
                    }
                })
                .collect();
        }
        out
    }

    /// Account for `request`. Returns `false` if the filter rejected it.
    pub fn add(&mut self, request: &RequestView<'_>) -> bool {
        if !self.filter.matches(request) {
            return false;
        }
        let id = request.id();
        let mut contributions = self.contributions(request);
        for (key, delta) in contributions.drain(..) {
            let Some(key) = key else {
                self.totals.apply(&delta.stats, &delta.samples);
                continue;
            };
            let Some((bucket, created)) = self.storage.entry(key, self.layout) else {
                continue;
            };
            let applied = bucket.add(id, &delta);
            if created {
                self.buckets += 1;
            }
            self.totals.apply(&applied, &delta.samples);
        }
        self.scratch = contributions;
        true
    }

    /// Take `request` back out. Returns `false` if the filter rejected it.
    ///
    /// Missing buckets are skipped; they only occur for requests that were never added. A
    /// bucket whose count drops to zero is deleted.
    pub fn remove(&mut self, request: &RequestView<'_>) -> bool {
        if !self.filter.matches(request) {
            return false;
        }
        let id = request.id();
        let mut contributions = self.contributions(request);
        for (key, delta) in contributions.drain(..) {
            let Some(key) = key else {
                if self.totals.retract(&delta.stats, &delta.samples).is_err() {
                    tracing::warn!(request = %id, "report totals would underflow, skipping");
                }
                continue;
            };
            let Some(bucket) = self.storage.get_mut(&key) else {
                tracing::trace!(%key, request = %id, "no bucket to remove from");
                continue;
            };
            let Ok(taken) = bucket.remove(id, &delta) else {
                tracing::warn!(%key, request = %id, "bucket would underflow, skipping");
                continue;
            };
            let emptied = bucket.count() == 0;
            if self.totals.retract(&taken, &delta.samples).is_err() {
                tracing::warn!(%key, request = %id, "report totals out of step with bucket");
            }
            if emptied && let Some(bucket) = self.storage.remove(&key) {
                self.buckets -= 1;
                let residual = bucket.into_aggregate();
                if !residual.is_empty() {
                    tracing::warn!(%key, ?residual, "bucket emptied with leftover sums");
                    let _ = self.totals.retract_all(&residual);
                }
            }
        }
        self.scratch = contributions;
        true
    }

    /// Look up one bucket.
    pub fn get(&self, key: &GroupKey) -> Option<&Bucket> {
        self.storage.get(key)
    }

    /// All buckets in key order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = BucketRef<'_>> + '_> {
        match &self.storage {
            Storage::Totals => Box::new(std::iter::empty()),
            Storage::Flat(level) => Box::new(flat_refs(level)),
            Storage::Nested(levels) => Box::new(
                levels
                    .iter()
                    .flat_map(|(outer, level)| nested_refs(outer, level)),
            ),
        }
    }

    /// Buckets under one outer key of a two-level report, in key order.
    pub fn under<'a>(&'a self, outer: &str) -> impl Iterator<Item = BucketRef<'a>> + use<'a> {
        let found = match &self.storage {
            Storage::Nested(levels) => levels.get_key_value(outer),
            _ => None,
        };
        found
            .into_iter()
            .flat_map(|(outer, level)| nested_refs(outer, level))
    }

    /// First bucket in key order.
    pub fn first(&self) -> Option<BucketRef<'_>> {
        self.iter().next()
    }

    /// First bucket whose key sorts strictly after `cursor`.
    ///
    /// The cursor doesn't have to exist anymore, so pagination survives its bucket being removed
    /// between calls. Buckets inserted after the cursor position are picked up.
    pub fn next_after(&self, cursor: &GroupKey) -> Option<BucketRef<'_>> {
        let after = (Bound::Excluded(cursor.inner()), Bound::Unbounded);
        match &self.storage {
            Storage::Totals => None,
            Storage::Flat(level) => flat_refs_range(level, after).next(),
            Storage::Nested(levels) => {
                let Some(outer) = cursor.outer() else {
                    return self.first();
                };
                if let Some((outer, level)) = levels.get_key_value(outer)
                    && let Some((key, bucket)) = level.range::<str, _>(after).next()
                {
                    return Some(BucketRef {
                        outer: Some(&**outer),
                        key,
                        bucket,
                    });
                }
                levels
                    .range::<str, _>((Bound::Excluded(outer), Bound::Unbounded))
                    .find_map(|(outer, level)| nested_refs(outer, level).next())
            }
        }
    }

    /// Drop every bucket and reset the totals.
    pub fn clear(&mut self) {
        self.storage = Storage::for_grouping(&self.grouping);
        self.totals = Aggregate::new(self.layout);
        self.buckets = 0;
    }
}

fn flat_refs_range<'a>(
    level: &'a Level,
    range: (Bound<&str>, Bound<&str>),
) -> impl Iterator<Item = BucketRef<'a>> {
    level.range::<str, _>(range).map(|(key, bucket)| BucketRef {
        outer: None,
        key,
        bucket,
    })
}
