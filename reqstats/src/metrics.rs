// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Operator counters published through [`metrics`](https://docs.rs/metrics) 0.24 when the
//! `metrics_rs_024` feature is enabled.
//!
//! The same numbers are always available from [`Engine::stats`](crate::Engine::stats); the
//! recorder only sees increments, labeled with `engine` = the engine's
//! [`name`](crate::EngineConfig#structfield.name).

/// Describes a metrics.rs unit in a non-exhaustive fashion
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MetricsRsUnit {
    /// a plain count
    Count,
}

/// Describes a metrics.rs metric type in a non-exhaustive fashion
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MetricsRsType {
    /// a monotonic counter
    Counter,
}

/// Metadata for one metric the engine emits.
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub struct DescribedMetric {
    /// metric name
    pub name: &'static str,
    /// unit
    pub unit: MetricsRsUnit,
    /// metric type
    pub r#type: MetricsRsType,
    /// human-readable description
    pub description: &'static str,
}

pub(crate) const ACCEPTED: &str = "reqstats_requests_accepted";
pub(crate) const MALFORMED: &str = "reqstats_requests_malformed";
pub(crate) const STAGING_DROPPED: &str = "reqstats_requests_staging_dropped";
pub(crate) const FORCE_EVICTED: &str = "reqstats_requests_force_evicted";
pub(crate) const EXPIRED: &str = "reqstats_requests_expired";

/// Metadata for the metrics emitted by an [`Engine`](crate::Engine), for implementing your own
/// describe function.
pub const ENGINE_METRICS: &[DescribedMetric] = &[
    DescribedMetric {
        name: ACCEPTED,
        unit: MetricsRsUnit::Count,
        r#type: MetricsRsType::Counter,
        description: "Requests moved from staging into the pool",
    },
    DescribedMetric {
        name: MALFORMED,
        unit: MetricsRsUnit::Count,
        r#type: MetricsRsType::Counter,
        description: "Requests dropped because their arrays didn't agree",
    },
    DescribedMetric {
        name: STAGING_DROPPED,
        unit: MetricsRsUnit::Count,
        r#type: MetricsRsType::Counter,
        description: "Requests dropped from a full staging queue",
    },
    DescribedMetric {
        name: FORCE_EVICTED,
        unit: MetricsRsUnit::Count,
        r#type: MetricsRsType::Counter,
        description: "Requests evicted, or never pooled, because the pool was full",
    },
    DescribedMetric {
        name: EXPIRED,
        unit: MetricsRsUnit::Count,
        r#type: MetricsRsType::Counter,
        description: "Requests that aged out of the retention window",
    },
];

/// Describe [`ENGINE_METRICS`] to the installed metrics.rs recorder, which makes their units
/// visible.
///
/// Not every recorder is idempotent in describe, so call this once per recorder.
#[cfg(feature = "metrics_rs_024")]
pub fn describe_engine_metrics() {
    for metric in ENGINE_METRICS {
        let unit = match metric.unit {
            MetricsRsUnit::Count => metrics_024::Unit::Count,
        };
        match metric.r#type {
            MetricsRsType::Counter => {
                metrics_024::describe_counter!(metric.name, unit, metric.description)
            }
        }
    }
}

#[cfg(feature = "metrics_rs_024")]
pub(crate) fn increment_counter(metric: &'static str, engine: &str, value: u64) {
    if value > 0 {
        metrics_024::counter!(metric, "engine" => engine.to_owned()).increment(value);
    }
}

#[cfg(not(feature = "metrics_rs_024"))]
pub(crate) fn increment_counter(_metric: &'static str, _engine: &str, _value: u64) {}
