// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, time::Duration};

/// A report definition that can't be turned into an index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DefinitionError {
    /// An attribute grouping with no attributes.
    NoAttributes,
    /// A tag grouping with no tags.
    NoTags,
    /// More tags than a grouping supports.
    TooManyTags {
        /// tags requested
        got: usize,
        /// supported maximum
        max: usize,
    },
    /// The same tag named twice.
    DuplicateTag(String),
    /// `min_time` is above `max_time`.
    InvertedTimeRange {
        /// lower bound
        min: Duration,
        /// upper bound
        max: Duration,
    },
    /// A histogram needs at least one bucket and a nonzero span of at least one nanosecond per
    /// bucket.
    InvalidHistogram {
        /// upper edge
        max: Duration,
        /// bucket count
        buckets: u32,
    },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::NoAttributes => f.write_str("grouping needs at least one attribute"),
            DefinitionError::NoTags => f.write_str("tag grouping needs at least one tag"),
            DefinitionError::TooManyTags { got, max } => {
                write!(f, "{got} tags requested, at most {max} supported")
            }
            DefinitionError::DuplicateTag(tag) => write!(f, "tag `{tag}` listed twice"),
            DefinitionError::InvertedTimeRange { min, max } => {
                write!(f, "min_time {min:?} is above max_time {max:?}")
            }
            DefinitionError::InvalidHistogram { max, buckets } => {
                write!(f, "can't split {max:?} into {buckets} histogram buckets")
            }
        }
    }
}

impl std::error::Error for DefinitionError {}
