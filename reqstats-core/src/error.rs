// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Why an [`IncomingRequest`](crate::IncomingRequest) was rejected.
///
/// Requests carry their timers as parallel arrays indexing into a shared dictionary. Any
/// disagreement between those arrays makes the whole request unusable, so it is dropped rather
/// than partially applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// `timer_hit_count`, `timer_value` and `timer_tag_count` must have one entry per timer.
    TimerCountMismatch {
        /// length of `timer_hit_count`
        hit_counts: usize,
        /// length of `timer_value`
        values: usize,
        /// length of `timer_tag_count`
        tag_counts: usize,
    },
    /// The per-timer tag counts don't add up to the number of timer tag names/values.
    TimerTagCountMismatch {
        /// sum over `timer_tag_count`
        declared: u64,
        /// length of `timer_tag_name`
        names: usize,
        /// length of `timer_tag_value`
        values: usize,
    },
    /// Optional per-timer resource usage arrays must be empty or have one entry per timer.
    TimerUsageMismatch {
        /// number of timers
        timers: usize,
        /// length of `timer_ru_utime`
        utime: usize,
        /// length of `timer_ru_stime`
        stime: usize,
    },
    /// Request-level `tag_name` and `tag_value` have different lengths.
    RequestTagMismatch {
        /// length of `tag_name`
        names: usize,
        /// length of `tag_value`
        values: usize,
    },
    /// A tag refers past the end of the dictionary.
    DictionaryIndexOutOfRange {
        /// offending index
        index: u32,
        /// dictionary length
        len: usize,
    },
    /// A timer reported zero hits.
    ZeroHitCount {
        /// position of the timer within the request
        timer: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TimerCountMismatch {
                hit_counts,
                values,
                tag_counts,
            } => write!(
                f,
                "timer arrays disagree: {hit_counts} hit counts, {values} values, {tag_counts} tag counts"
            ),
            DecodeError::TimerTagCountMismatch {
                declared,
                names,
                values,
            } => write!(
                f,
                "timers declare {declared} tags but carry {names} names and {values} values"
            ),
            DecodeError::TimerUsageMismatch {
                timers,
                utime,
                stime,
            } => write!(
                f,
                "{timers} timers but {utime} user times and {stime} system times"
            ),
            DecodeError::RequestTagMismatch { names, values } => {
                write!(f, "{names} request tag names but {values} values")
            }
            DecodeError::DictionaryIndexOutOfRange { index, len } => {
                write!(f, "dictionary index {index} out of range (len {len})")
            }
            DecodeError::ZeroHitCount { timer } => write!(f, "timer {timer} has a zero hit count"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// An interner ran out of ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternError {
    pub(crate) limit: u32,
}

impl InternError {
    /// The capacity the interner was configured with.
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl fmt::Display for InternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interner is full ({} entries)", self.limit)
    }
}

impl std::error::Error for InternError {}
