// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod catalog;
pub mod clock;
mod config;
pub mod definition;
mod driver;
mod engine;
mod error;
mod lock;
pub mod metrics;
pub mod pool;
mod rate_limit;
mod registry;
mod report;
mod snapshot;

pub use catalog::{BASE_REPORTS, BaseReport};
pub use clock::Clock;
pub use config::EngineConfig;
pub use definition::{ReportDefinition, ReportShape, TagReportKind};
pub use driver::{Driver, DriverJoinHandle};
pub use engine::{Engine, EngineStats, MergeSummary};
pub use error::{ConfigError, LookupError};
pub use pool::{AppendError, EventPool, PoolStats};
pub use report::{Report, ReportHandle};
pub use snapshot::{RequestSnapshot, TimerSnapshot};

pub use reqstats_aggregation::{
    Aggregate, AggregationIndex, Bucket, BucketRef, DefinitionError, Histogram, HistogramLayout,
    ReportFilter, Stats,
};
pub use reqstats_core::{
    Attribute, DecodeError, GroupKey, IncomingRequest, RequestId,
    incoming::{IncomingRequestBuilder, Timer},
};
