// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! Incremental aggregation for `reqstats`.
//!
//! An [`AggregationIndex`] keeps running sums, counts and a latency [`Histogram`] per grouping
//! key. Events are fed in with [`AggregationIndex::add`] and taken back out with
//! [`AggregationIndex::remove`] once they age out, so the index always describes exactly the
//! events currently held in the pool.
//!
//! What a key is made of is decided by a [`Grouping`]: nothing (report-wide totals only), a
//! tuple of request attributes, or the values of one or more timer or request tags.

mod error;
pub mod filter;
pub mod grouping;
pub mod histogram;
mod index;
mod stats;

pub use error::DefinitionError;
pub use filter::ReportFilter;
pub use grouping::{Grouping, TagScope};
pub use histogram::{Histogram, HistogramLayout};
pub use index::{AggregationIndex, BucketRef};
pub use stats::{Aggregate, Bucket, Stats};
