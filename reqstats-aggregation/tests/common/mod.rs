// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::time::{Duration, SystemTime};

use reqstats_core::{
    Interner, RequestId, RequestRecord, RequestView, TagId, TagPair, TimerRecord, TimerSpan,
    WordId,
};

pub fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Request description for [`Fixture::push`].
#[derive(Clone, Debug)]
pub struct Req {
    pub script: &'static str,
    pub host: &'static str,
    pub server: &'static str,
    pub status: u16,
    pub time: Duration,
    pub doc_size: u64,
    pub tags: Vec<(&'static str, &'static str)>,
    pub timers: Vec<Tmr>,
}

#[derive(Clone, Debug)]
pub struct Tmr {
    pub value: Duration,
    pub hits: u32,
    pub tags: Vec<(&'static str, &'static str)>,
}

pub fn req(script: &'static str, time_ms: u64) -> Req {
    Req {
        script,
        host: "web-1",
        server: "www.example.com",
        status: 200,
        time: ms(time_ms),
        doc_size: 1024,
        tags: vec![],
        timers: vec![],
    }
}

impl Req {
    pub fn host(mut self, host: &'static str) -> Self {
        self.host = host;
        self
    }

    pub fn server(mut self, server: &'static str) -> Self {
        self.server = server;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn tag(mut self, name: &'static str, value: &'static str) -> Self {
        self.tags.push((name, value));
        self
    }

    pub fn timer(mut self, value_ms: u64, hits: u32, tags: &[(&'static str, &'static str)]) -> Self {
        self.timers.push(Tmr {
            value: ms(value_ms),
            hits,
            tags: tags.to_vec(),
        });
        self
    }
}

/// Stand-in for the event pool: owns records, timers and interners, and hands out views.
#[derive(Default)]
pub struct Fixture {
    pub words: Interner<WordId>,
    pub tags: Interner<TagId>,
    requests: Vec<RequestRecord>,
    timers: Vec<TimerRecord>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair(&mut self, name: &str, value: &str) -> TagPair {
        TagPair {
            tag: self.tags.intern(name).unwrap(),
            value: self.words.intern(value).unwrap(),
        }
    }

    /// Store a request and return its index.
    pub fn push(&mut self, req: Req) -> usize {
        let start = self.timers.len() as u64;
        for timer in &req.timers {
            let tags = timer.tags.iter().map(|(n, v)| self.pair(n, v)).collect();
            self.timers.push(TimerRecord {
                value: timer.value,
                hit_count: timer.hits,
                ru_utime: Duration::ZERO,
                ru_stime: Duration::ZERO,
                tags,
            });
        }
        let tags = req.tags.iter().map(|(n, v)| self.pair(n, v)).collect();
        let index = self.requests.len();
        self.requests.push(RequestRecord {
            id: RequestId(index as u64 + 1),
            timestamp: SystemTime::now(),
            hostname: req.host.into(),
            server_name: req.server.into(),
            script_name: req.script.into(),
            schema: "https".into(),
            status: req.status,
            req_count: 1,
            doc_size: req.doc_size,
            memory_peak: 0,
            memory_footprint: 4096,
            req_time: req.time,
            ru_utime: Duration::ZERO,
            ru_stime: Duration::ZERO,
            tags,
            timers: TimerSpan {
                start,
                len: req.timers.len() as u32,
            },
        });
        index
    }

    pub fn view(&self, index: usize) -> RequestView<'_> {
        let record = &self.requests[index];
        let span = record.timers;
        let timers = &self.timers[span.start as usize..span.end() as usize];
        RequestView::new(record, (timers, &[]), &self.words, &self.tags)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn tag(&self, name: &str) -> TagId {
        self.tags.get(name).unwrap()
    }
}
