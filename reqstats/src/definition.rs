// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Report definitions and their textual ids.
//!
//! A report id names the grouping, optionally followed by a filter query:
//!
//! ```text
//! by_script
//! tag_report:user_id,group?min=100&tag.country=nl
//! ```
//!
//! Every definition has exactly one canonical id, which is what the registry is keyed by. Filter
//! bounds are kept at millisecond precision and required tags are listed sorted by name, so
//! `by_host?tag.b=2&tag.a=1` and `by_host?tag.a=1&tag.b=2` name the same report.

use std::{fmt::Write as _, str::FromStr, time::Duration};

use reqstats_aggregation::{Grouping, ReportFilter, TagScope};
use reqstats_core::{Interner, TagId};
use smallvec::SmallVec;

use crate::{BaseReport, LookupError};

const RESERVED: &[char] = &[',', '?', '&', '='];

/// The tag-grouped report kinds, by id prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagReportKind {
    /// `tag_info`: timers grouped by tag values.
    TagInfo,
    /// `tag_report`: timers grouped by script, then tag values.
    TagReport,
    /// `tag_report2`: timers grouped by script, then host, server and tag values.
    TagReport2,
    /// `rtag_info`: requests grouped by request tag values.
    RequestTagInfo,
    /// `rtag_report`: requests grouped by host, then request tag values.
    RequestTagReport,
}

impl TagReportKind {
    const ALL: [TagReportKind; 5] = [
        TagReportKind::TagInfo,
        TagReportKind::TagReport,
        TagReportKind::TagReport2,
        TagReportKind::RequestTagInfo,
        TagReportKind::RequestTagReport,
    ];

    /// Id prefix.
    pub fn name(self) -> &'static str {
        match self {
            TagReportKind::TagInfo => "tag_info",
            TagReportKind::TagReport => "tag_report",
            TagReportKind::TagReport2 => "tag_report2",
            TagReportKind::RequestTagInfo => "rtag_info",
            TagReportKind::RequestTagReport => "rtag_report",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// True if the kind groups timers rather than whole requests.
    pub fn groups_timers(self) -> bool {
        matches!(
            self,
            TagReportKind::TagInfo | TagReportKind::TagReport | TagReportKind::TagReport2
        )
    }

    /// Scope of the tag grouping.
    pub fn scope(self) -> TagScope {
        match self {
            TagReportKind::TagInfo | TagReportKind::RequestTagInfo => TagScope::Global,
            TagReportKind::TagReport => TagScope::PerScript,
            TagReportKind::TagReport2 => TagScope::PerScriptHostServer,
            TagReportKind::RequestTagReport => TagScope::PerHost,
        }
    }
}

/// What a report groups by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReportShape {
    /// One of the [`BASE_REPORTS`](crate::BASE_REPORTS).
    Base(&'static BaseReport),
    /// Grouped by tag values.
    Tags {
        /// report kind
        kind: TagReportKind,
        /// tag names, in key order
        tags: SmallVec<[Box<str>; 2]>,
    },
}

/// A report that can be looked up in an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReportDefinition {
    shape: ReportShape,
    filter: ReportFilter,
}

fn check_name<'a>(id: &str, name: &'a str, what: &'static str) -> Result<&'a str, LookupError> {
    if name.is_empty() {
        return Err(malformed(id, what));
    }
    if name.contains(RESERVED) {
        return Err(malformed(id, "reserved character in tag name or value"));
    }
    Ok(name)
}

fn malformed(id: &str, reason: &'static str) -> LookupError {
    LookupError::Malformed {
        id: id.to_owned(),
        reason,
    }
}

// ids only carry whole milliseconds
fn truncate_ms(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis().try_into().unwrap_or(u64::MAX))
}

impl ReportDefinition {
    /// An unfiltered base report, by id (`info`, `by_script`, ...).
    pub fn base(id: &str) -> Result<Self, LookupError> {
        let base = BaseReport::find(id).ok_or_else(|| LookupError::UnknownReport(id.to_owned()))?;
        Ok(Self::from_base(base))
    }

    pub(crate) fn from_base(base: &'static BaseReport) -> Self {
        Self {
            shape: ReportShape::Base(base),
            filter: ReportFilter::default(),
        }
    }

    /// A tag-grouped report over `tags`, in key order.
    pub fn tags<S: AsRef<str>>(kind: TagReportKind, tags: &[S]) -> Result<Self, LookupError> {
        let tags = tags
            .iter()
            .map(|tag| check_name(kind.name(), tag.as_ref(), "empty tag name").map(Box::from))
            .collect::<Result<SmallVec<_>, _>>()?;
        if tags.is_empty() {
            return Err(malformed(kind.name(), "no tags"));
        }
        Ok(Self {
            shape: ReportShape::Tags { kind, tags },
            filter: ReportFilter::default(),
        })
    }

    /// Restrict the report to requests passing `filter`. Bounds are truncated to whole
    /// milliseconds.
    pub fn with_filter(mut self, filter: ReportFilter) -> Result<Self, LookupError> {
        filter.validate()?;
        let mut normalized = ReportFilter::new();
        if let Some(min) = filter.min() {
            normalized = normalized.min_time(truncate_ms(min));
        }
        if let Some(max) = filter.max() {
            normalized = normalized.max_time(truncate_ms(max));
        }
        for (name, value) in filter.tags() {
            check_name("filter", name, "empty tag name")?;
            check_name("filter", value, "empty tag value")?;
            normalized = normalized.require_tag(name, value);
        }
        normalized.validate()?;
        self.filter = normalized;
        Ok(self)
    }

    /// What the report groups by.
    pub fn shape(&self) -> &ReportShape {
        &self.shape
    }

    /// The report's filter.
    pub fn filter(&self) -> &ReportFilter {
        &self.filter
    }

    /// True for the reports an engine keeps from startup on. These are never torn down.
    pub fn is_base(&self) -> bool {
        matches!(self.shape, ReportShape::Base(_)) && self.filter.is_empty()
    }

    /// The one id this definition is registered under.
    pub fn canonical_id(&self) -> String {
        let mut id = match &self.shape {
            ReportShape::Base(base) => base.id().to_owned(),
            ReportShape::Tags { kind, tags } => format!("{}:{}", kind.name(), tags.join(",")),
        };
        let mut separator = '?';
        let mut param = |id: &mut String, args: std::fmt::Arguments<'_>| {
            id.push(separator);
            // writing to a String can't fail
            let _ = id.write_fmt(args);
            separator = '&';
        };
        if let Some(min) = self.filter.min() {
            param(&mut id, format_args!("min={}", min.as_millis()));
        }
        if let Some(max) = self.filter.max() {
            param(&mut id, format_args!("max={}", max.as_millis()));
        }
        for (name, value) in self.filter.tags() {
            param(&mut id, format_args!("tag.{name}={value}"));
        }
        id
    }

    /// The grouping with tag names resolved against the pool's tag interner. A tag that was
    /// never seen can't group anything, so it is reported as unknown.
    pub(crate) fn grouping(&self, interned: &Interner<TagId>) -> Result<Grouping, LookupError> {
        match &self.shape {
            ReportShape::Base(base) => Ok(base.grouping()),
            ReportShape::Tags { kind, tags } => {
                let ids = tags
                    .iter()
                    .map(|name| {
                        interned
                            .get(name)
                            .ok_or_else(|| LookupError::UnknownTag(name.to_string()))
                    })
                    .collect::<Result<SmallVec<[TagId; 2]>, _>>()?;
                let grouping = if kind.groups_timers() {
                    Grouping::timer_tags(&ids, kind.scope())
                } else {
                    Grouping::request_tags(&ids, kind.scope())
                };
                Ok(grouping?)
            }
        }
    }
}

impl FromStr for ReportDefinition {
    type Err = LookupError;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        let (path, query) = match id.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (id, None),
        };
        let definition = match path.split_once(':') {
            None => Self::base(path)?,
            Some((kind, tags)) => {
                let kind = TagReportKind::from_name(kind)
                    .ok_or_else(|| LookupError::UnknownReport(kind.to_owned()))?;
                if tags.is_empty() {
                    return Err(malformed(id, "no tags"));
                }
                let tags = tags
                    .split(',')
                    .map(|tag| check_name(id, tag, "empty tag name"))
                    .collect::<Result<SmallVec<[&str; 2]>, _>>()?;
                Self::tags(kind, &tags)?
            }
        };
        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(definition);
        };

        let mut filter = ReportFilter::new();
        for param in query.split('&') {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| malformed(id, "filter parameter without `=`"))?;
            let millis = || {
                value
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| malformed(id, "filter bound is not a whole number of milliseconds"))
            };
            filter = match key {
                "min" => filter.min_time(millis()?),
                "max" => filter.max_time(millis()?),
                _ => match key.strip_prefix("tag.") {
                    Some(name) => filter.require_tag(
                        check_name(id, name, "empty tag name")?,
                        check_name(id, value, "empty tag value")?,
                    ),
                    None => return Err(malformed(id, "unknown filter parameter")),
                },
            };
        }
        definition.with_filter(filter)
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use reqstats_aggregation::DefinitionError;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::base("info")]
    #[case::base_nested("by_status_schema_host")]
    #[case::timer_tags("tag_info:user_id")]
    #[case::scoped("tag_report2:user_id,group")]
    #[case::request_tags("rtag_report:country")]
    #[case::filtered("by_script?min=100&max=2000&tag.country=nl")]
    #[case::tag_filter_only("tag_report:user_id?tag.a=1&tag.b=2")]
    fn canonical_ids_parse_to_themselves(#[case] id: &str) {
        let definition: ReportDefinition = id.parse().unwrap();
        check!(definition.canonical_id() == id);
    }

    #[rstest]
    #[case("by_host?tag.b=2&tag.a=1", "by_host?tag.a=1&tag.b=2")]
    #[case("by_host?max=20&min=10", "by_host?min=10&max=20")]
    #[case("by_host?", "by_host")]
    #[case("by_host?tag.a=1&tag.a=2", "by_host?tag.a=2")]
    fn equivalent_ids_share_a_canonical_form(#[case] id: &str, #[case] canonical: &str) {
        let definition: ReportDefinition = id.parse().unwrap();
        check!(definition.canonical_id() == canonical);
    }

    #[rstest]
    #[case::unknown_base("by_user")]
    #[case::unknown_kind("tag_summary:a")]
    fn unknown_reports(#[case] id: &str) {
        let_assert!(Err(LookupError::UnknownReport(_)) = id.parse::<ReportDefinition>());
    }

    #[rstest]
    #[case::no_tags("tag_info:")]
    #[case::empty_tag("tag_info:a,,b")]
    #[case::no_value("by_host?min")]
    #[case::bad_bound("by_host?min=1.5")]
    #[case::unknown_param("by_host?limit=10")]
    #[case::empty_filter_tag("by_host?tag.=x")]
    fn malformed_ids(#[case] id: &str) {
        let_assert!(Err(LookupError::Malformed { .. }) = id.parse::<ReportDefinition>());
    }

    #[test]
    fn inverted_bounds_are_refused() {
        let_assert!(
            Err(LookupError::Definition(DefinitionError::InvertedTimeRange { .. })) =
                "by_script?min=20&max=10".parse::<ReportDefinition>()
        );
    }

    #[test]
    fn programmatic_definitions_match_parsed_ones() {
        let built = ReportDefinition::tags(TagReportKind::TagReport, &["user_id"])
            .unwrap()
            .with_filter(ReportFilter::new().min_time(Duration::from_micros(100_900)))
            .unwrap();
        check!(built.canonical_id() == "tag_report:user_id?min=100");
        check!(built == "tag_report:user_id?min=100".parse::<ReportDefinition>().unwrap());
        check!(!built.is_base());
        check!(ReportDefinition::base("by_host").unwrap().is_base());

        let_assert!(
            Err(LookupError::Malformed { .. }) =
                ReportDefinition::tags(TagReportKind::TagInfo, &["a,b"])
        );
    }

    #[test]
    fn grouping_needs_interned_tags() {
        let mut interned = Interner::<TagId>::new();
        let user = interned.intern("user_id").unwrap();

        let definition: ReportDefinition = "tag_report:user_id".parse().unwrap();
        check!(
            definition.grouping(&interned).unwrap()
                == Grouping::timer_tags(&[user], TagScope::PerScript).unwrap()
        );

        let definition: ReportDefinition = "rtag_info:user_id,country".parse().unwrap();
        let_assert!(Err(LookupError::UnknownTag(tag)) = definition.grouping(&interned));
        check!(tag == "country");

        let definition: ReportDefinition = "tag_info:user_id,user_id".parse().unwrap();
        let_assert!(
            Err(LookupError::Definition(DefinitionError::DuplicateTag(_))) =
                definition.grouping(&interned)
        );
    }
}
