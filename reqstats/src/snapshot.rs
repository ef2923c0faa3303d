// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime};

use reqstats_core::{RequestId, RequestView};

/// An owned copy of a pooled request with its tags resolved, handed out by
/// [`Engine::pool_iterate_next`](crate::Engine::pool_iterate_next).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// arrival sequence number, usable as a pagination cursor
    pub id: RequestId,
    /// arrival time
    pub timestamp: SystemTime,
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
    /// number of requests this event stands for
    pub req_count: u32,
    /// response size in bytes
    pub doc_size: u64,
    /// peak memory in bytes
    pub memory_peak: u64,
    /// memory footprint in bytes
    pub memory_footprint: u64,
    /// wall-clock time
    pub req_time: Duration,
    /// user CPU time
    pub ru_utime: Duration,
    /// system CPU time
    pub ru_stime: Duration,
    /// request-level tags
    pub tags: Vec<(String, String)>,
    /// timers, in submission order
    pub timers: Vec<TimerSnapshot>,
}

/// One timer of a [`RequestSnapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerSnapshot {
    /// total time across all hits
    pub value: Duration,
    /// hit count
    pub hit_count: u32,
    /// user CPU time
    pub ru_utime: Duration,
    /// system CPU time
    pub ru_stime: Duration,
    /// timer tags
    pub tags: Vec<(String, String)>,
}

fn owned<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Vec<(String, String)> {
    tags.map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect()
}

impl From<RequestView<'_>> for RequestSnapshot {
    fn from(view: RequestView<'_>) -> Self {
        let record = view.record();
        Self {
            id: record.id,
            timestamp: record.timestamp,
            hostname: record.hostname.to_string(),
            server_name: record.server_name.to_string(),
            script_name: record.script_name.to_string(),
            schema: record.schema.to_string(),
            status: record.status,
            req_count: record.req_count,
            doc_size: record.doc_size,
            memory_peak: record.memory_peak,
            memory_footprint: record.memory_footprint,
            req_time: record.req_time,
            ru_utime: record.ru_utime,
            ru_stime: record.ru_stime,
            tags: owned(view.request_tags()),
            timers: view
                .timers()
                .map(|timer| TimerSnapshot {
                    value: timer.value,
                    hit_count: timer.hit_count,
                    ru_utime: timer.ru_utime,
                    ru_stime: timer.ru_stime,
                    tags: owned(view.timer_tags(timer)),
                })
                .collect(),
        }
    }
}
