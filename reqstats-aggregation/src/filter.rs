// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Report conditions.
//!
//! A report can be restricted to requests whose wall-clock time falls in a range and/or that
//! carry specific request-level tag values. Filtered-out requests touch neither the buckets nor
//! the report totals.

use std::time::Duration;

use reqstats_core::RequestView;

use crate::DefinitionError;

/// Conditions a request must meet to be counted by a report.
///
/// The default filter accepts everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReportFilter {
    min_time: Option<Duration>,
    max_time: Option<Duration>,
    // sorted by name so equal filters compare equal
    tags: Vec<(Box<str>, Box<str>)>,
}

impl ReportFilter {
    /// A filter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject requests faster than `min`. Zero disables the bound.
    pub fn min_time(mut self, min: Duration) -> Self {
        self.min_time = (!min.is_zero()).then_some(min);
        self
    }

    /// Reject requests slower than `max`. Zero disables the bound.
    pub fn max_time(mut self, max: Duration) -> Self {
        self.max_time = (!max.is_zero()).then_some(max);
        self
    }

    /// Only accept requests tagged `name=value`. A request that carries `name` with any other
    /// value is rejected, as is one that doesn't carry `name` at all.
    pub fn require_tag(mut self, name: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.tags.binary_search_by(|(n, _)| n.cmp(&name)) {
            Ok(existing) => self.tags[existing].1 = value,
            Err(position) => self.tags.insert(position, (name, value)),
        }
        self
    }

    /// The lower time bound, if any.
    pub fn min(&self) -> Option<Duration> {
        self.min_time
    }

    /// The upper time bound, if any.
    pub fn max(&self) -> Option<Duration> {
        self.max_time
    }

    /// Required request tags, sorted by name.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(n, v)| (&**n, &**v))
    }

    /// True if the filter accepts everything.
    pub fn is_empty(&self) -> bool {
        self.min_time.is_none() && self.max_time.is_none() && self.tags.is_empty()
    }

    /// Check the bounds are consistent.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        match (self.min_time, self.max_time) {
            (Some(min), Some(max)) if min > max => {
                Err(DefinitionError::InvertedTimeRange { min, max })
            }
            _ => Ok(()),
        }
    }

    /// Does `request` pass?
    pub fn matches(&self, request: &RequestView<'_>) -> bool {
        let req_time = request.record().req_time;
        if self.min_time.is_some_and(|min| req_time < min) {
            return false;
        }
        if self.max_time.is_some_and(|max| req_time > max) {
            return false;
        }
        self.tags.iter().all(|(name, value)| {
            let mut found = false;
            for (tag, tag_value) in request.request_tags() {
                if tag == &**name {
                    if tag_value != &**value {
                        return false;
                    }
                    found = true;
                }
            }
            found
        })
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::*;

    #[test]
    fn zero_bounds_are_disabled() {
        let filter = ReportFilter::new()
            .min_time(Duration::ZERO)
            .max_time(Duration::ZERO);
        check!(filter.is_empty());
    }

    #[test]
    fn tags_are_sorted_and_replaced() {
        let filter = ReportFilter::new()
            .require_tag("b", "1")
            .require_tag("a", "2")
            .require_tag("b", "3");
        check!(filter.tags().collect::<Vec<_>>() == [("a", "2"), ("b", "3")]);
        check!(
            filter
                == ReportFilter::new()
                    .require_tag("a", "2")
                    .require_tag("b", "3")
        );
    }

    #[test]
    fn inverted_range() {
        let filter = ReportFilter::new()
            .min_time(Duration::from_secs(2))
            .max_time(Duration::from_secs(1));
        let_assert!(Err(DefinitionError::InvertedTimeRange { .. }) = filter.validate());
    }
}
