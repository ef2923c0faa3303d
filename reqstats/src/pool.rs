// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The event pool: every request currently inside the retention window, oldest first.
//!
//! Requests live in one ring and their timers in a second one, where each request owns a
//! contiguous run. Both rings are only ever appended at the back and evicted from the front, so
//! a request's timers can be located from its [`TimerSpan`] alone. The request ring has a fixed
//! capacity; the timer ring grows in steps when a burst needs more room and shrinks back once it
//! has been mostly empty.

use std::{
    collections::VecDeque,
    fmt,
    ops::Range,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqstats_core::{
    DecodeError, IncomingRequest, Interner, RequestId, RequestRecord, RequestView, TagId, TagPair,
    TimerRecord, TimerSpan, WordId, limits,
};

use crate::{EngineConfig, rate_limit::throttled};

/// Why [`EventPool::append`] refused a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendError {
    /// The request's arrays don't agree with each other.
    Malformed(DecodeError),
    /// The request ring is full; evict something first.
    Full,
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::Malformed(err) => write!(f, "malformed request: {err}"),
            AppendError::Full => f.write_str("request pool is full"),
        }
    }
}

impl std::error::Error for AppendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppendError::Malformed(err) => Some(err),
            AppendError::Full => None,
        }
    }
}

/// Occupancy figures of an [`EventPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// pooled requests
    pub requests: usize,
    /// request ring capacity
    pub request_capacity: usize,
    /// pooled timers
    pub timers: usize,
    /// current timer ring capacity
    pub timer_capacity: usize,
    /// distinct tag values
    pub words: usize,
    /// distinct tag names
    pub tags: usize,
    /// tags dropped because an interner was full
    pub dropped_tags: u64,
}

/// Ring storage for decoded requests and their timers, plus the interners their tags point into.
pub struct EventPool {
    requests: VecDeque<RequestRecord>,
    capacity: usize,
    timers: VecDeque<TimerRecord>,
    // sequence number of timers[0]
    timer_base: u64,
    timer_capacity: usize,
    grow_step: usize,
    shrink_factor: usize,
    next_id: u64,
    last_timestamp: SystemTime,
    words: Interner<WordId>,
    tags: Interner<TagId>,
    dropped_tags: u64,
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("stats", &self.stats())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl EventPool {
    /// An empty pool sized by `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            requests: VecDeque::new(),
            capacity: config.request_pool_size.max(1),
            timers: VecDeque::new(),
            timer_base: 0,
            timer_capacity: config.timer_pool_grow_step.max(1),
            grow_step: config.timer_pool_grow_step.max(1),
            shrink_factor: config.timer_pool_shrink_factor.max(1),
            next_id: 1,
            last_timestamp: UNIX_EPOCH,
            words: Interner::with_limit(config.max_interned),
            tags: Interner::with_limit(config.max_interned),
            dropped_tags: 0,
        }
    }

    /// Number of pooled requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if no requests are pooled.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Request ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if [`Self::append`] would fail with [`AppendError::Full`].
    pub fn is_full(&self) -> bool {
        self.requests.len() >= self.capacity
    }

    /// Interned tag values.
    pub fn words(&self) -> &Interner<WordId> {
        &self.words
    }

    /// Interned tag names.
    pub fn tags(&self) -> &Interner<TagId> {
        &self.tags
    }

    /// Occupancy figures.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            requests: self.requests.len(),
            request_capacity: self.capacity,
            timers: self.timers.len(),
            timer_capacity: self.timer_capacity,
            words: self.words.len(),
            tags: self.tags.len(),
            dropped_tags: self.dropped_tags,
        }
    }

    /// Arrival time of the oldest and newest pooled request.
    pub fn time_range(&self) -> Option<(SystemTime, SystemTime)> {
        Some((self.requests.front()?.timestamp, self.requests.back()?.timestamp))
    }

    /// Decode, intern and store `request`, stamped with `now`.
    ///
    /// Timestamps never go backwards: if `now` is older than the newest pooled request, that
    /// request's timestamp is used instead. Attribute values are cut to their
    /// [`limits`]. A tag that doesn't fit into a full interner is dropped, the rest of the request
    /// is kept.
    pub fn append(
        &mut self,
        request: &IncomingRequest,
        now: SystemTime,
    ) -> Result<RequestId, AppendError> {
        request.validate().map_err(AppendError::Malformed)?;
        if self.is_full() {
            return Err(AppendError::Full);
        }

        let start = self.timer_base + self.timers.len() as u64;
        self.reserve_timers(request.timer_count());
        for timer in request.timers() {
            let tags = timer
                .tags()
                .filter_map(|(name, value)| self.intern_pair(name, value))
                .collect();
            self.timers.push_back(TimerRecord {
                value: timer.value,
                hit_count: timer.hit_count,
                ru_utime: timer.ru_utime,
                ru_stime: timer.ru_stime,
                tags,
            });
        }
        let end = self.timer_base + self.timers.len() as u64;
        let tags = request
            .tags()
            .filter_map(|(name, value)| self.intern_pair(name, value))
            .collect();

        // UNIX_EPOCH marks unusable slots
        let timestamp = now
            .max(self.last_timestamp)
            .max(UNIX_EPOCH + Duration::from_nanos(1));
        self.last_timestamp = timestamp;
        let id = RequestId(self.next_id);
        self.next_id += 1;

        self.requests.push_back(RequestRecord {
            id,
            timestamp,
            hostname: limits::truncate(&request.hostname, limits::HOSTNAME).into(),
            server_name: limits::truncate(&request.server_name, limits::SERVER_NAME).into(),
            script_name: limits::truncate(&request.script_name, limits::SCRIPT_NAME).into(),
            schema: limits::truncate(&request.schema, limits::SCHEMA).into(),
            status: request.status,
            req_count: request.request_count,
            doc_size: request.document_size,
            memory_peak: request.memory_peak,
            memory_footprint: request.memory_footprint,
            req_time: request.request_time,
            ru_utime: request.ru_utime,
            ru_stime: request.ru_stime,
            tags,
            timers: TimerSpan {
                start,
                len: (end - start) as u32,
            },
        });
        Ok(id)
    }

    fn intern_pair(&mut self, name: &str, value: &str) -> Option<TagPair> {
        let value = limits::truncate(value, limits::TAG_VALUE);
        let interned = self
            .tags
            .intern(name)
            .and_then(|tag| self.words.intern(value).map(|value| TagPair { tag, value }));
        match interned {
            Ok(pair) => Some(pair),
            Err(err) => {
                self.dropped_tags += 1;
                throttled!(Duration::from_secs(1), |suppressed| tracing::warn!(
                    limit = err.limit(),
                    suppressed,
                    "interner is full, dropping tag"
                ));
                None
            }
        }
    }

    fn reserve_timers(&mut self, additional: usize) {
        let needed = self.timers.len() + additional;
        if needed <= self.timer_capacity {
            return;
        }
        let steps = (needed - self.timer_capacity).div_ceil(self.grow_step);
        let grown = self.timer_capacity + steps * self.grow_step;
        tracing::warn!(
            from = self.timer_capacity,
            to = grown,
            "timer pool is full, growing it"
        );
        self.timers.reserve(grown - self.timers.len());
        self.timer_capacity = grown;
    }

    fn maybe_shrink_timers(&mut self) {
        let spare = self.timer_capacity - self.timers.len();
        if self.timer_capacity <= self.grow_step
            || spare <= self.shrink_factor.saturating_mul(self.grow_step)
        {
            return;
        }
        let shrunk = self.timers.len().div_ceil(self.grow_step).max(1) * self.grow_step;
        tracing::debug!(from = self.timer_capacity, to = shrunk, "shrinking timer pool");
        self.timers.shrink_to(shrunk);
        self.timer_capacity = shrunk;
    }

    /// Drop the `n` oldest requests and their timers. Reports must have been told to remove them
    /// first. Returns how many were dropped.
    pub fn discard_oldest(&mut self, n: usize) -> usize {
        let n = n.min(self.requests.len());
        if n == 0 {
            return 0;
        }
        let timers_end = self.requests[n - 1].timers.end();
        self.requests.drain(..n);
        let expired = (timers_end.saturating_sub(self.timer_base) as usize).min(self.timers.len());
        self.timers.drain(..expired);
        self.timer_base += expired as u64;
        self.maybe_shrink_timers();
        n
    }

    /// Number of requests that arrived before `cutoff`. They are always the oldest ones.
    pub fn count_older_than(&self, cutoff: SystemTime) -> usize {
        self.requests.partition_point(|r| r.timestamp < cutoff)
    }

    fn timer_slices(&self, span: TimerSpan) -> (&[TimerRecord], &[TimerRecord]) {
        let start = (span.start.saturating_sub(self.timer_base) as usize).min(self.timers.len());
        let end = (start + span.len as usize).min(self.timers.len());
        let (head, tail) = self.timers.as_slices();
        if end <= head.len() {
            (&head[start..end], &[])
        } else if start >= head.len() {
            (&tail[start - head.len()..end - head.len()], &[])
        } else {
            (&head[start..], &tail[..end - head.len()])
        }
    }

    fn view_at(&self, index: usize) -> Option<RequestView<'_>> {
        let record = self.requests.get(index)?;
        Some(RequestView::new(
            record,
            self.timer_slices(record.timers),
            &self.words,
            &self.tags,
        ))
    }

    /// The pooled request with this id, if it is still pooled.
    pub fn view(&self, id: RequestId) -> Option<RequestView<'_>> {
        let front = self.requests.front()?.id;
        let index = id.0.checked_sub(front.0)?;
        self.view_at(usize::try_from(index).ok()?)
    }

    /// The oldest request arriving after `cursor`, or the oldest request overall. Requests
    /// evicted since `cursor` was handed out are skipped.
    pub fn next_after(&self, cursor: Option<RequestId>) -> Option<RequestView<'_>> {
        let front = self.requests.front()?.id;
        let index = match cursor {
            Some(id) if id >= front => usize::try_from(id.0 - front.0 + 1).ok()?,
            _ => 0,
        };
        self.views(index..self.requests.len()).next()
    }

    fn views(&self, range: Range<usize>) -> Views<'_> {
        Views { pool: self, range }
    }

    /// Every pooled request, oldest first.
    pub fn iter(&self) -> Views<'_> {
        self.views(0..self.requests.len())
    }

    /// The `n` oldest requests.
    pub fn oldest(&self, n: usize) -> Views<'_> {
        self.views(0..n.min(self.requests.len()))
    }

    /// Requests from position `index` on, e.g. everything appended after the pool held `index`
    /// requests.
    pub fn from_position(&self, index: usize) -> Views<'_> {
        self.views(index.min(self.requests.len())..self.requests.len())
    }
}

/// Iterator over pooled requests in arrival order. Unusable slots are skipped.
#[derive(Clone, Debug)]
pub struct Views<'a> {
    pool: &'a EventPool,
    range: Range<usize>,
}

impl<'a> Iterator for Views<'a> {
    type Item = RequestView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.range.next()?;
            let view = self.pool.view_at(index)?;
            if view.record().is_valid() {
                return Some(view);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.range.len()))
    }
}
