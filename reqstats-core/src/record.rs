// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    borrow::Cow,
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use smallvec::SmallVec;

use crate::{TagId, WordId};

/// Maximum stored length, in bytes, of request attributes. Longer values are cut at the last
/// char boundary that fits.
pub mod limits {
    /// hostname
    pub const HOSTNAME: usize = 32;
    /// server name
    pub const SERVER_NAME: usize = 64;
    /// script name
    pub const SCRIPT_NAME: usize = 128;
    /// schema
    pub const SCHEMA: usize = 16;
    /// timer and request tag values
    pub const TAG_VALUE: usize = 64;

    /// Cut `value` to at most `max` bytes without splitting a character.
    pub fn truncate(value: &str, max: usize) -> &str {
        if value.len() <= max {
            return value;
        }
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        &value[..end]
    }
}

/// Arrival sequence number of a request. Strictly increasing for the lifetime of a pool and never
/// reused, unlike ring positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An interned `name=value` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagPair {
    /// tag name
    pub tag: TagId,
    /// tag value
    pub value: WordId,
}

fn find_tag(tags: &[TagPair], tag: TagId) -> Option<WordId> {
    tags.iter().find(|pair| pair.tag == tag).map(|pair| pair.value)
}

/// One timer sub-event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerRecord {
    /// Total time across all hits.
    pub value: Duration,
    /// Number of times the timer fired. Never zero.
    pub hit_count: u32,
    /// user CPU time
    pub ru_utime: Duration,
    /// system CPU time
    pub ru_stime: Duration,
    /// tags attached to the timer
    pub tags: SmallVec<[TagPair; 4]>,
}

impl TimerRecord {
    /// Value of `tag` on this timer, if present.
    pub fn tag_value(&self, tag: TagId) -> Option<WordId> {
        find_tag(&self.tags, tag)
    }
}

/// Where a request's timers live in the timer ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerSpan {
    /// Sequence number of the first timer.
    pub start: u64,
    /// Number of timers.
    pub len: u32,
}

impl TimerSpan {
    /// Sequence number one past the last timer.
    pub fn end(&self) -> u64 {
        self.start + u64::from(self.len)
    }
}

/// A decoded request as stored in the event pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    /// arrival sequence number
    pub id: RequestId,
    /// Arrival time. `UNIX_EPOCH` marks an unusable slot.
    pub timestamp: SystemTime,
    /// hostname
    pub hostname: Box<str>,
    /// server name
    pub server_name: Box<str>,
    /// script name
    pub script_name: Box<str>,
    /// schema (e.g. `http`)
    pub schema: Box<str>,
    /// HTTP status
    pub status: u16,
    /// Number of requests this record stands for, as reported by the client.
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
    pub tags: SmallVec<[TagPair; 2]>,
    /// the request's timers
    pub timers: TimerSpan,
}

impl RequestRecord {
    /// False for sentinel records that iteration must skip.
    pub fn is_valid(&self) -> bool {
        self.timestamp != UNIX_EPOCH
    }

    /// Value of the request-level `tag`, if present.
    pub fn tag_value(&self, tag: TagId) -> Option<WordId> {
        find_tag(&self.tags, tag)
    }

    /// The value of a groupable attribute.
    pub fn attribute(&self, attribute: Attribute) -> Cow<'_, str> {
        match attribute {
            Attribute::Script => Cow::Borrowed(&self.script_name),
            Attribute::Server => Cow::Borrowed(&self.server_name),
            Attribute::Host => Cow::Borrowed(&self.hostname),
            Attribute::Schema => Cow::Borrowed(&self.schema),
            Attribute::Status => Cow::Owned(self.status.to_string()),
        }
    }
}

/// Request attributes base reports group by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    /// script name
    Script,
    /// server name
    Server,
    /// hostname
    Host,
    /// HTTP status
    Status,
    /// schema
    Schema,
}

impl Attribute {
    /// Lowercase name, used in report ids.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::Script => "script",
            Attribute::Server => "server",
            Attribute::Host => "host",
            Attribute::Status => "status",
            Attribute::Schema => "schema",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rstest::rstest;

    use super::limits::truncate;

    #[rstest]
    #[case("short", 16, "short")]
    #[case("exactly", 7, "exactly")]
    #[case("abcdef", 3, "abc")]
    #[case("héllo", 2, "h")]
    #[case("", 0, "")]
    fn truncate_respects_char_boundaries(
        #[case] input: &str,
        #[case] max: usize,
        #[case] expected: &str,
    ) {
        check!(truncate(input, max) == expected);
    }
}
