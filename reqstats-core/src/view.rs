// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use crate::{Interner, RequestId, RequestRecord, TagId, TimerRecord, WordId};

/// A pooled request together with everything needed to interpret it: its timers and the
/// interners its tags point into.
///
/// Views borrow the pool, so they only live as long as the lock protecting it is held.
#[derive(Clone, Copy, Debug)]
pub struct RequestView<'a> {
    record: &'a RequestRecord,
    // a run of the timer ring may wrap, hence two slices
    timers: (&'a [TimerRecord], &'a [TimerRecord]),
    words: &'a Interner<WordId>,
    tags: &'a Interner<TagId>,
}

impl<'a> RequestView<'a> {
    /// Assemble a view. `timers` must be the request's timers in order, split in two when the
    /// run wraps around the end of the ring.
    pub fn new(
        record: &'a RequestRecord,
        timers: (&'a [TimerRecord], &'a [TimerRecord]),
        words: &'a Interner<WordId>,
        tags: &'a Interner<TagId>,
    ) -> Self {
        debug_assert_eq!(
            timers.0.len() + timers.1.len(),
            record.timers.len as usize,
            "timer slices don't match the record's span"
        );
        Self {
            record,
            timers,
            words,
            tags,
        }
    }

    /// The underlying record.
    pub fn record(&self) -> &'a RequestRecord {
        self.record
    }

    /// Arrival sequence number.
    pub fn id(&self) -> RequestId {
        self.record.id
    }

    /// Arrival time.
    pub fn timestamp(&self) -> SystemTime {
        self.record.timestamp
    }

    /// The request's timers in order.
    pub fn timers(&self) -> impl Iterator<Item = &'a TimerRecord> + Clone + use<'a> {
        let (head, tail) = self.timers;
        head.iter().chain(tail.iter())
    }

    /// Number of timers.
    pub fn timer_count(&self) -> usize {
        self.timers.0.len() + self.timers.1.len()
    }

    /// Resolve a tag value. Unknown ids resolve to the empty string.
    pub fn word(&self, id: WordId) -> &'a str {
        self.words.resolve(id).unwrap_or_default()
    }

    /// Resolve a tag name. Unknown ids resolve to the empty string.
    pub fn tag_name(&self, id: TagId) -> &'a str {
        self.tags.resolve(id).unwrap_or_default()
    }

    /// Request-level tags as `(name, value)` strings.
    pub fn request_tags(&self) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a> {
        let (record, words, tags) = (self.record, self.words, self.tags);
        record.tags.iter().map(move |pair| {
            (
                tags.resolve(pair.tag).unwrap_or_default(),
                words.resolve(pair.value).unwrap_or_default(),
            )
        })
    }

    /// Tags of one timer as `(name, value)` strings.
    pub fn timer_tags(
        &self,
        timer: &'a TimerRecord,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a> {
        let (words, tags) = (self.words, self.tags);
        timer.tags.iter().map(move |pair| {
            (
                tags.resolve(pair.tag).unwrap_or_default(),
                words.resolve(pair.value).unwrap_or_default(),
            )
        })
    }
}
