// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use reqstats_aggregation::HistogramLayout;

use crate::ConfigError;

/// Parameters of an [`Engine`](crate::Engine).
///
/// Every field has a default, so with the `serde` feature a partial document is enough. Durations
/// are plain integers in the unit their name says, with [`Duration`] accessors:
///
/// ```
/// use std::time::Duration;
/// use reqstats::EngineConfig;
///
/// let config = EngineConfig::new().retention(Duration::from_secs(60));
/// assert_eq!(config.retention_window(), Duration::from_secs(60));
/// assert_eq!(config.request_pool_size, 1_000_000);
/// ```
///
/// The setters panic on values that can never work, the same way
/// [`Engine::new`](crate::Engine::new) rejects them for deserialized configs.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Maximum age of a pooled event, in seconds.
    ///
    /// Defaults to 900 (15 minutes).
    pub retention_secs: u64,

    /// How often the driver merges staged events and applies retention, in milliseconds.
    ///
    /// Defaults to 10.
    pub merge_interval_ms: u64,

    /// Capacity of the request ring. Once it is full the oldest events are evicted early, which
    /// is logged as data loss.
    ///
    /// Defaults to `1_000_000`.
    pub request_pool_size: usize,

    /// Number of submitted events that can wait for the next merge. When full, the oldest
    /// waiting event is dropped.
    ///
    /// Defaults to `64 * 1024`.
    pub staging_capacity: usize,

    /// Number of timer slots the timer ring grows by when full.
    ///
    /// Defaults to `256 * 1024`.
    pub timer_pool_grow_step: usize,

    /// The timer ring is shrunk once it has more than `factor * grow_step` unused slots.
    ///
    /// Defaults to 5.
    pub timer_pool_shrink_factor: usize,

    /// Seconds without a lookup after which an on-demand report is torn down. `None` or `0`
    /// keeps them forever.
    ///
    /// Defaults to 600 (10 minutes).
    pub tag_report_timeout_secs: Option<u64>,

    /// Upper edge of the latency histograms, in milliseconds. Longer durations land in the last
    /// bucket.
    ///
    /// Defaults to `10_000`.
    pub histogram_max_ms: u64,

    /// Number of histogram buckets.
    ///
    /// Defaults to 512.
    pub histogram_buckets: u32,

    /// Threads used to update reports during a merge.
    ///
    /// Defaults to 1, i.e. reports are updated on the driver thread.
    pub report_parallelism: usize,

    /// Maximum number of distinct strings per interner (tag names and tag values are counted
    /// separately). Tags that would exceed it are dropped.
    ///
    /// Defaults to `u32::MAX`.
    pub max_interned: u32,

    /// Name of the background driver thread.
    ///
    /// Defaults to `reqstats-driver`.
    pub driver_thread_name: String,

    /// Name of the engine, used as the `engine` label on published metrics.
    ///
    /// Defaults to `reqstats`.
    pub name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_secs: 15 * 60,
            merge_interval_ms: 10,
            request_pool_size: 1_000_000,
            staging_capacity: 64 * 1024,
            timer_pool_grow_step: 256 * 1024,
            timer_pool_shrink_factor: 5,
            tag_report_timeout_secs: Some(10 * 60),
            histogram_max_ms: 10_000,
            histogram_buckets: 512,
            report_parallelism: 1,
            max_interned: u32::MAX,
            driver_thread_name: "reqstats-driver".into(),
            name: "reqstats".into(),
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum age of a pooled event.
    pub fn retention(mut self, retention: Duration) -> Self {
        assert!(retention >= Duration::from_secs(1), "retention must be at least a second");
        self.retention_secs = retention.as_secs();
        self
    }

    /// Driver period.
    pub fn merge_interval(mut self, interval: Duration) -> Self {
        assert!(
            Duration::ZERO < interval && interval < Duration::from_secs(60),
            "merge_interval must be in the range (0, 1 minute), not {interval:?}"
        );
        self.merge_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Request ring capacity.
    pub fn request_pool_size(mut self, size: usize) -> Self {
        assert!(size > 0);
        self.request_pool_size = size;
        self
    }

    /// Staging queue capacity.
    pub fn staging_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0);
        self.staging_capacity = capacity;
        self
    }

    /// Timer ring growth step and shrink factor.
    pub fn timer_pool(mut self, grow_step: usize, shrink_factor: usize) -> Self {
        assert!(grow_step > 0);
        assert!(shrink_factor > 0);
        self.timer_pool_grow_step = grow_step;
        self.timer_pool_shrink_factor = shrink_factor;
        self
    }

    /// Idle timeout of on-demand reports. `None` keeps them forever.
    pub fn tag_report_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tag_report_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    /// Histogram range and resolution. Buckets must be at least a millisecond wide.
    pub fn histogram(mut self, max: Duration, buckets: u32) -> Self {
        assert!(buckets > 0);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if let Err(err) = check_resolution(max_ms, buckets) {
            panic!("{err}");
        }
        self.histogram_max_ms = max_ms;
        self.histogram_buckets = buckets;
        self
    }

    /// Threads used to update reports during a merge.
    pub fn report_parallelism(mut self, threads: usize) -> Self {
        assert!(threads > 0);
        self.report_parallelism = threads;
        self
    }

    /// Interner capacity.
    pub fn max_interned(mut self, max: u32) -> Self {
        assert!(max > 0);
        self.max_interned = max;
        self
    }

    /// Background thread name.
    pub fn driver_thread_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty());
        self.driver_thread_name = name;
        self
    }

    /// Engine name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty());
        self.name = name;
        self
    }

    /// See [`Self::retention_secs`].
    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// See [`Self::merge_interval_ms`].
    pub fn merge_period(&self) -> Duration {
        Duration::from_millis(self.merge_interval_ms)
    }

    /// See [`Self::tag_report_timeout_secs`].
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.tag_report_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    /// Histogram layout described by [`Self::histogram_max_ms`] and [`Self::histogram_buckets`].
    pub fn histogram_layout(&self) -> Result<HistogramLayout, ConfigError> {
        let layout = HistogramLayout::new(
            Duration::from_millis(self.histogram_max_ms),
            self.histogram_buckets,
        )
        .map_err(ConfigError::Histogram)?;
        check_resolution(self.histogram_max_ms, self.histogram_buckets)?;
        Ok(layout)
    }

    /// Check values that deserialization can't rule out.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("retention_secs", self.retention_secs as usize),
            ("merge_interval_ms", self.merge_interval_ms as usize),
            ("request_pool_size", self.request_pool_size),
            ("staging_capacity", self.staging_capacity),
            ("timer_pool_grow_step", self.timer_pool_grow_step),
            ("timer_pool_shrink_factor", self.timer_pool_shrink_factor),
            ("report_parallelism", self.report_parallelism),
            ("max_interned", self.max_interned as usize),
        ];
        if let Some(&(field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.driver_thread_name.is_empty() {
            return Err(ConfigError::Zero {
                field: "driver_thread_name",
            });
        }
        if self.name.is_empty() {
            return Err(ConfigError::Zero { field: "name" });
        }
        self.histogram_layout().map(drop)
    }
}

// filters and report ids work in whole milliseconds
fn check_resolution(max_ms: u64, buckets: u32) -> Result<(), ConfigError> {
    if max_ms < u64::from(buckets) {
        return Err(ConfigError::HistogramResolution { max_ms, buckets });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        check!(config.retention_window() == Duration::from_secs(900));
        check!(config.merge_period() == Duration::from_millis(10));
        check!(config.idle_timeout() == Some(Duration::from_secs(600)));
        check!(config.histogram_layout().unwrap() == HistogramLayout::default());
        check!(config.validate().is_ok());
    }

    #[test]
    fn setters_round_trip() {
        let config = EngineConfig::new()
            .retention(Duration::from_secs(30))
            .merge_interval(Duration::from_micros(10))
            .tag_report_timeout(None)
            .histogram(Duration::from_secs(1), 100);
        check!(config.retention_secs == 30);
        check!(config.merge_interval_ms == 1);
        check!(config.idle_timeout().is_none());
        check!(config.histogram_layout().unwrap().bucket_width() == Duration::from_millis(10));
    }

    #[test]
    fn zero_timeout_means_never() {
        let config = EngineConfig {
            tag_report_timeout_secs: Some(0),
            ..Default::default()
        };
        check!(config.idle_timeout().is_none());
    }

    #[test]
    fn validate_names_the_bad_field() {
        let config = EngineConfig {
            staging_capacity: 0,
            ..Default::default()
        };
        let_assert!(Err(ConfigError::Zero { field: "staging_capacity" }) = config.validate());

        let config = EngineConfig {
            histogram_buckets: 0,
            ..Default::default()
        };
        let_assert!(Err(ConfigError::Histogram(_)) = config.validate());
    }

    #[test]
    fn sub_millisecond_buckets_are_rejected_everywhere() {
        let config = EngineConfig {
            histogram_max_ms: 100,
            histogram_buckets: 1000,
            ..Default::default()
        };
        let_assert!(
            Err(ConfigError::HistogramResolution {
                max_ms: 100,
                buckets: 1000
            }) = config.validate()
        );
        check!(config.histogram_layout().is_err());

        let ok = EngineConfig::new().histogram(Duration::from_millis(100), 100);
        check!(ok.validate().is_ok());
    }

    #[test]
    #[should_panic = "narrower than a millisecond"]
    fn histogram_setter_rejects_sub_millisecond_buckets() {
        let _ = EngineConfig::new().histogram(Duration::from_millis(100), 1000);
    }

    #[test]
    #[should_panic = "merge_interval must be in the range"]
    fn merge_interval_is_bounded() {
        let _ = EngineConfig::new().merge_interval(Duration::from_secs(120));
    }
}
