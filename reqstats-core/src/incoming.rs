// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The decoded shape of an inbound request.
//!
//! This mirrors what a client library sends: scalar request fields, plus timers encoded as
//! parallel arrays whose tags index into a per-request string dictionary. Nothing here has been
//! checked yet; [`IncomingRequest::validate`] must pass before the timers can be walked.

use std::{collections::HashMap, time::Duration};

use crate::DecodeError;

/// A decoded but unvalidated request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    /// hostname
    pub hostname: String,
    /// server name
    pub server_name: String,
    /// script name
    pub script_name: String,
    /// schema
    pub schema: String,
    /// HTTP status
    pub status: u16,
    /// number of requests this record stands for
    pub request_count: u32,
    /// response size in bytes
    pub document_size: u64,
    /// peak memory in bytes
    pub memory_peak: u64,
    /// memory footprint in bytes
    pub memory_footprint: u64,
    /// wall-clock time
    pub request_time: Duration,
    /// user CPU time
    pub ru_utime: Duration,
    /// system CPU time
    pub ru_stime: Duration,
    /// strings referenced by tag indices
    pub dictionary: Vec<String>,
    /// per timer: hit count
    pub timer_hit_count: Vec<u32>,
    /// per timer: total time
    pub timer_value: Vec<Duration>,
    /// per timer: user CPU time. Either empty or one per timer.
    pub timer_ru_utime: Vec<Duration>,
    /// per timer: system CPU time. Either empty or one per timer.
    pub timer_ru_stime: Vec<Duration>,
    /// per timer: how many of the following tag name/value entries belong to it
    pub timer_tag_count: Vec<u32>,
    /// timer tag names, as dictionary indices
    pub timer_tag_name: Vec<u32>,
    /// timer tag values, as dictionary indices
    pub timer_tag_value: Vec<u32>,
    /// request tag names, as dictionary indices
    pub tag_name: Vec<u32>,
    /// request tag values, as dictionary indices
    pub tag_value: Vec<u32>,
}

impl IncomingRequest {
    /// Start building a request for `script_name`.
    pub fn builder(script_name: impl Into<String>) -> IncomingRequestBuilder {
        IncomingRequestBuilder::new(script_name)
    }

    /// Number of timers, going by `timer_value`.
    pub fn timer_count(&self) -> usize {
        self.timer_value.len()
    }

    /// Check that the parallel arrays agree with each other and with the dictionary.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let timers = self.timer_value.len();
        if self.timer_hit_count.len() != timers || self.timer_tag_count.len() != timers {
            return Err(DecodeError::TimerCountMismatch {
                hit_counts: self.timer_hit_count.len(),
                values: timers,
                tag_counts: self.timer_tag_count.len(),
            });
        }
        let usage_ok = |v: &Vec<Duration>| v.is_empty() || v.len() == timers;
        if !usage_ok(&self.timer_ru_utime) || !usage_ok(&self.timer_ru_stime) {
            return Err(DecodeError::TimerUsageMismatch {
                timers,
                utime: self.timer_ru_utime.len(),
                stime: self.timer_ru_stime.len(),
            });
        }
        if let Some(timer) = self.timer_hit_count.iter().position(|&hits| hits == 0) {
            return Err(DecodeError::ZeroHitCount { timer });
        }

        let declared: u64 = self.timer_tag_count.iter().map(|&c| u64::from(c)).sum();
        if declared != self.timer_tag_name.len() as u64
            || declared != self.timer_tag_value.len() as u64
        {
            return Err(DecodeError::TimerTagCountMismatch {
                declared,
                names: self.timer_tag_name.len(),
                values: self.timer_tag_value.len(),
            });
        }
        if self.tag_name.len() != self.tag_value.len() {
            return Err(DecodeError::RequestTagMismatch {
                names: self.tag_name.len(),
                values: self.tag_value.len(),
            });
        }

        let len = self.dictionary.len();
        let indices = self
            .timer_tag_name
            .iter()
            .chain(&self.timer_tag_value)
            .chain(&self.tag_name)
            .chain(&self.tag_value);
        for &index in indices {
            if index as usize >= len {
                return Err(DecodeError::DictionaryIndexOutOfRange { index, len });
            }
        }
        Ok(())
    }

    /// Walk the timers. Only meaningful after [`Self::validate`] succeeded; on an invalid request
    /// the iteration stops early instead of panicking.
    pub fn timers(&self) -> impl Iterator<Item = IncomingTimer<'_>> {
        let mut offset = 0usize;
        (0..self.timer_count()).map_while(move |i| {
            let count = *self.timer_tag_count.get(i)? as usize;
            let names = self.timer_tag_name.get(offset..offset + count)?;
            let values = self.timer_tag_value.get(offset..offset + count)?;
            offset += count;
            Some(IncomingTimer {
                value: self.timer_value[i],
                hit_count: *self.timer_hit_count.get(i)?,
                ru_utime: self.timer_ru_utime.get(i).copied().unwrap_or_default(),
                ru_stime: self.timer_ru_stime.get(i).copied().unwrap_or_default(),
                names,
                values,
                dictionary: &self.dictionary,
            })
        })
    }

    /// Request-level tags as `(name, value)` strings. Out-of-range entries are skipped.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tag_name
            .iter()
            .zip(&self.tag_value)
            .filter_map(|(&name, &value)| {
                Some((
                    self.dictionary.get(name as usize)?.as_str(),
                    self.dictionary.get(value as usize)?.as_str(),
                ))
            })
    }
}

/// One timer of an [`IncomingRequest`].
#[derive(Clone, Copy, Debug)]
pub struct IncomingTimer<'a> {
    /// total time across all hits
    pub value: Duration,
    /// number of hits
    pub hit_count: u32,
    /// user CPU time
    pub ru_utime: Duration,
    /// system CPU time
    pub ru_stime: Duration,
    names: &'a [u32],
    values: &'a [u32],
    dictionary: &'a [String],
}

impl<'a> IncomingTimer<'a> {
    /// Tags as `(name, value)` strings. Out-of-range entries are skipped.
    pub fn tags(&self) -> impl Iterator<Item = (&'a str, &'a str)> + use<'a> {
        let dictionary = self.dictionary;
        self.names
            .iter()
            .zip(self.values)
            .filter_map(move |(&name, &value)| {
                Some((
                    dictionary.get(name as usize)?.as_str(),
                    dictionary.get(value as usize)?.as_str(),
                ))
            })
    }
}

/// Builds a well-formed [`IncomingRequest`], deduplicating dictionary strings the way client
/// libraries do.
///
/// ```
/// use std::time::Duration;
/// use reqstats_core::incoming::{IncomingRequest, Timer};
///
/// let request = IncomingRequest::builder("/index.php")
///     .hostname("web-1")
///     .request_time(Duration::from_millis(120))
///     .timer(Timer::new(Duration::from_millis(30)).tag("group", "db"))
///     .timer(Timer::new(Duration::from_millis(10)).hits(2).tag("group", "cache"))
///     .build();
/// assert!(request.validate().is_ok());
/// assert_eq!(request.dictionary, ["group", "db", "cache"]);
/// ```
#[derive(Clone, Debug)]
pub struct IncomingRequestBuilder {
    request: IncomingRequest,
    words: HashMap<String, u32>,
}

impl IncomingRequestBuilder {
    fn new(script_name: impl Into<String>) -> Self {
        Self {
            request: IncomingRequest {
                script_name: script_name.into(),
                status: 200,
                request_count: 1,
                ..Default::default()
            },
            words: HashMap::new(),
        }
    }

    fn word(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.words.get(value) {
            return index;
        }
        let index = self.request.dictionary.len() as u32;
        self.request.dictionary.push(value.to_owned());
        self.words.insert(value.to_owned(), index);
        index
    }

    /// Set the hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.request.hostname = hostname.into();
        self
    }

    /// Set the server name.
    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.request.server_name = server_name.into();
        self
    }

    /// Set the schema.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.request.schema = schema.into();
        self
    }

    /// Set the HTTP status. Defaults to 200.
    pub fn status(mut self, status: u16) -> Self {
        self.request.status = status;
        self
    }

    /// Set the wall-clock time.
    pub fn request_time(mut self, request_time: Duration) -> Self {
        self.request.request_time = request_time;
        self
    }

    /// Set user and system CPU time.
    pub fn cpu(mut self, ru_utime: Duration, ru_stime: Duration) -> Self {
        self.request.ru_utime = ru_utime;
        self.request.ru_stime = ru_stime;
        self
    }

    /// Set the response size in bytes.
    pub fn document_size(mut self, bytes: u64) -> Self {
        self.request.document_size = bytes;
        self
    }

    /// Set peak memory and memory footprint in bytes.
    pub fn memory(mut self, peak: u64, footprint: u64) -> Self {
        self.request.memory_peak = peak;
        self.request.memory_footprint = footprint;
        self
    }

    /// Add a request-level tag.
    pub fn tag(mut self, name: &str, value: &str) -> Self {
        let name = self.word(name);
        let value = self.word(value);
        self.request.tag_name.push(name);
        self.request.tag_value.push(value);
        self
    }

    /// Add a timer.
    pub fn timer(mut self, timer: Timer) -> Self {
        self.request.timer_value.push(timer.value);
        self.request.timer_hit_count.push(timer.hit_count);
        self.request.timer_tag_count.push(timer.tags.len() as u32);
        let has_usage = timer.ru_utime.is_some() || timer.ru_stime.is_some();
        if has_usage || !self.request.timer_ru_utime.is_empty() {
            // backfill earlier timers so the usage arrays stay aligned
            let timers = self.request.timer_value.len();
            self.request.timer_ru_utime.resize(timers - 1, Duration::ZERO);
            self.request.timer_ru_stime.resize(timers - 1, Duration::ZERO);
            self.request.timer_ru_utime.push(timer.ru_utime.unwrap_or_default());
            self.request.timer_ru_stime.push(timer.ru_stime.unwrap_or_default());
        }
        for (name, value) in &timer.tags {
            let name = self.word(name);
            let value = self.word(value);
            self.request.timer_tag_name.push(name);
            self.request.timer_tag_value.push(value);
        }
        self
    }

    /// Finish the request.
    pub fn build(self) -> IncomingRequest {
        self.request
    }
}

/// A timer to add through [`IncomingRequestBuilder::timer`].
#[derive(Clone, Debug)]
pub struct Timer {
    value: Duration,
    hit_count: u32,
    ru_utime: Option<Duration>,
    ru_stime: Option<Duration>,
    tags: Vec<(String, String)>,
}

impl Timer {
    /// A timer that fired once and took `value`.
    pub fn new(value: Duration) -> Self {
        Self {
            value,
            hit_count: 1,
            ru_utime: None,
            ru_stime: None,
            tags: Vec::new(),
        }
    }

    /// Set the hit count. `value` stays the total across all hits.
    pub fn hits(mut self, hit_count: u32) -> Self {
        self.hit_count = hit_count;
        self
    }

    /// Set user and system CPU time.
    pub fn cpu(mut self, ru_utime: Duration, ru_stime: Duration) -> Self {
        self.ru_utime = Some(ru_utime);
        self.ru_stime = Some(ru_stime);
        self
    }

    /// Attach a tag.
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::{check, let_assert};

    use super::*;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn sample() -> IncomingRequest {
        IncomingRequest::builder("/a.php")
            .hostname("h1")
            .tag("region", "eu")
            .timer(Timer::new(ms(5)).tag("group", "db").tag("op", "select"))
            .timer(Timer::new(ms(7)).hits(3))
            .timer(Timer::new(ms(1)).tag("group", "cache"))
            .build()
    }

    #[test]
    fn builder_produces_valid_request() {
        let request = sample();
        check!(request.validate().is_ok());
        check!(request.timer_tag_count == [2, 0, 1]);
        check!(request.timer_ru_utime.is_empty());

        let timers: Vec<_> = request.timers().collect();
        check!(timers.len() == 3);
        check!(timers[0].tags().collect::<Vec<_>>() == [("group", "db"), ("op", "select")]);
        check!(timers[1].hit_count == 3);
        check!(timers[1].tags().count() == 0);
        check!(timers[2].tags().collect::<Vec<_>>() == [("group", "cache")]);
        check!(request.tags().collect::<Vec<_>>() == [("region", "eu")]);
    }

    #[test]
    fn timer_cpu_backfills_earlier_timers() {
        let request = IncomingRequest::builder("/x")
            .timer(Timer::new(ms(1)))
            .timer(Timer::new(ms(2)).cpu(ms(1), ms(2)))
            .timer(Timer::new(ms(3)))
            .build();
        check!(request.validate().is_ok());
        check!(request.timer_ru_utime == [ms(0), ms(1), ms(0)]);
        check!(request.timer_ru_stime == [ms(0), ms(2), ms(0)]);
    }

    #[test]
    fn mismatched_timer_arrays() {
        let mut request = sample();
        request.timer_hit_count.pop();
        let_assert!(Err(DecodeError::TimerCountMismatch { hit_counts: 2, values: 3, .. }) = request.validate());
    }

    #[test]
    fn tag_counts_must_add_up() {
        let mut request = sample();
        request.timer_tag_count[2] = 4;
        let_assert!(Err(DecodeError::TimerTagCountMismatch { declared: 6, names: 3, values: 3 }) = request.validate());
        // the walk stops instead of reading past the arrays
        check!(request.timers().count() == 2);
    }

    #[test]
    fn dictionary_bounds() {
        let mut request = sample();
        request.timer_tag_value[0] = 99;
        let_assert!(Err(DecodeError::DictionaryIndexOutOfRange { index: 99, .. }) = request.validate());
    }

    #[test]
    fn request_tags_must_pair_up() {
        let mut request = sample();
        request.tag_value.clear();
        let_assert!(Err(DecodeError::RequestTagMismatch { names: 1, values: 0 }) = request.validate());
    }

    #[test]
    fn zero_hits_rejected() {
        let mut request = sample();
        request.timer_hit_count[1] = 0;
        let_assert!(Err(DecodeError::ZeroHitCount { timer: 1 }) = request.validate());
    }

    #[test]
    fn usage_arrays_must_align() {
        let mut request = sample();
        request.timer_ru_utime = vec![ms(1)];
        let_assert!(Err(DecodeError::TimerUsageMismatch { timers: 3, utime: 1, stime: 0 }) = request.validate());
    }
}
