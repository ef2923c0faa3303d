// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Grouping strategies: how a request is turned into bucket keys.
//!
//! | strategy | keyed by | contributes |
//! |---|---|---|
//! | [`Grouping::Totals`] | nothing | report totals only |
//! | [`Grouping::Attributes`] | one or more request attributes | the request |
//! | [`Grouping::TimerTags`] | values of 1..N timer tags | every matching timer |
//! | [`Grouping::RequestTags`] | values of 1..N request tags | the request |
//!
//! Tag groupings additionally pick a [`TagScope`], which decides whether tag values are grouped
//! globally or per script/host.

use reqstats_core::{Attribute, GroupKey, KeyBuilder, RequestView, TagId};
use smallvec::{SmallVec, smallvec};

use crate::{DefinitionError, Stats, stats::Delta};

/// Maximum number of tags a tag grouping can combine.
pub const MAX_TAGS: usize = 8;

/// Where tag values are grouped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagScope {
    /// One bucket per tag value tuple.
    Global,
    /// Buckets per script name, then per tag value tuple.
    PerScript,
    /// Buckets per script name, then per `host|server|values` tuple.
    PerScriptHostServer,
    /// Buckets per hostname, then per tag value tuple.
    PerHost,
}

/// How a report keys its buckets.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Grouping {
    /// No buckets, only report-wide totals.
    Totals,
    /// Keyed by a tuple of request attributes, in the given order.
    Attributes(SmallVec<[Attribute; 3]>),
    /// Keyed by the values of timer tags. A timer contributes only if it carries all of them.
    TimerTags {
        /// tags whose values form the key
        tags: SmallVec<[TagId; 2]>,
        /// grouping scope
        scope: TagScope,
    },
    /// Keyed by the values of request-level tags. A request contributes only if it carries all
    /// of them.
    RequestTags {
        /// tags whose values form the key
        tags: SmallVec<[TagId; 2]>,
        /// grouping scope
        scope: TagScope,
    },
}

fn check_tags(tags: &[TagId]) -> Result<(), DefinitionError> {
    if tags.is_empty() {
        return Err(DefinitionError::NoTags);
    }
    if tags.len() > MAX_TAGS {
        return Err(DefinitionError::TooManyTags {
            got: tags.len(),
            max: MAX_TAGS,
        });
    }
    for (i, tag) in tags.iter().enumerate() {
        if tags[..i].contains(tag) {
            return Err(DefinitionError::DuplicateTag(format!("#{}", i)));
        }
    }
    Ok(())
}

impl Grouping {
    /// Group by a tuple of attributes.
    pub fn attributes(attributes: &[Attribute]) -> Result<Self, DefinitionError> {
        if attributes.is_empty() {
            return Err(DefinitionError::NoAttributes);
        }
        Ok(Grouping::Attributes(attributes.iter().copied().collect()))
    }

    /// Group timers by tag values.
    pub fn timer_tags(tags: &[TagId], scope: TagScope) -> Result<Self, DefinitionError> {
        check_tags(tags)?;
        Ok(Grouping::TimerTags {
            tags: tags.iter().copied().collect(),
            scope,
        })
    }

    /// Group requests by request tag values.
    pub fn request_tags(tags: &[TagId], scope: TagScope) -> Result<Self, DefinitionError> {
        check_tags(tags)?;
        Ok(Grouping::RequestTags {
            tags: tags.iter().copied().collect(),
            scope,
        })
    }

    /// True for groupings with an outer key.
    pub fn is_nested(&self) -> bool {
        match self {
            Grouping::Totals | Grouping::Attributes(_) => false,
            Grouping::TimerTags { scope, .. } | Grouping::RequestTags { scope, .. } => {
                *scope != TagScope::Global
            }
        }
    }

    /// True for groupings without buckets.
    pub fn is_totals(&self) -> bool {
        matches!(self, Grouping::Totals)
    }

    /// Compute what `request` contributes, pushing one `(key, delta)` per matching unit. Keys may
    /// repeat; the index merges them. For [`Grouping::Totals`] the key is `None`.
    pub(crate) fn contributions(
        &self,
        request: &RequestView<'_>,
        out: &mut Vec<(Option<GroupKey>, Delta)>,
    ) {
        match self {
            Grouping::Totals => out.push((None, request_delta(request))),
            Grouping::Attributes(attributes) => {
                let record = request.record();
                let mut key = KeyBuilder::new();
                for &attribute in attributes {
                    key.push(&record.attribute(attribute));
                }
                out.push((Some(GroupKey::flat(key.finish())), request_delta(request)));
            }
            Grouping::RequestTags { tags, scope } => {
                let record = request.record();
                let values: Option<SmallVec<[&str; 2]>> = tags
                    .iter()
                    .map(|&tag| record.tag_value(tag).map(|word| request.word(word)))
                    .collect();
                if let Some(values) = values {
                    out.push((Some(scoped_key(request, *scope, &values)), request_delta(request)));
                }
            }
            Grouping::TimerTags { tags, scope } => {
                for timer in request.timers() {
                    let values: Option<SmallVec<[&str; 2]>> = tags
                        .iter()
                        .map(|&tag| timer.tag_value(tag).map(|word| request.word(word)))
                        .collect();
                    let Some(values) = values else { continue };
                    let hits = timer.hit_count.max(1);
                    let delta = Delta {
                        stats: Stats {
                            count: 1,
                            hit_count: u64::from(hits),
                            req_time: timer.value,
                            ru_utime: timer.ru_utime,
                            ru_stime: timer.ru_stime,
                            doc_size: 0,
                            memory_footprint: 0,
                        },
                        samples: smallvec![(timer.value / hits, hits)],
                    };
                    out.push((Some(scoped_key(request, *scope, &values)), delta));
                }
            }
        }
    }
}

fn request_delta(request: &RequestView<'_>) -> Delta {
    let record = request.record();
    Delta {
        stats: Stats {
            count: 1,
            hit_count: 1,
            req_time: record.req_time,
            ru_utime: record.ru_utime,
            ru_stime: record.ru_stime,
            doc_size: record.doc_size,
            memory_footprint: record.memory_footprint,
        },
        samples: smallvec![(record.req_time, 1)],
    }
}

fn scoped_key(request: &RequestView<'_>, scope: TagScope, values: &[&str]) -> GroupKey {
    let record = request.record();
    let mut key = KeyBuilder::new();
    let outer = match scope {
        TagScope::Global => None,
        TagScope::PerScript => Some(&*record.script_name),
        TagScope::PerScriptHostServer => {
            key.push(&record.hostname).push(&record.server_name);
            Some(&*record.script_name)
        }
        TagScope::PerHost => Some(&*record.hostname),
    };
    for value in values {
        key.push(value);
    }
    match outer {
        None => GroupKey::flat(key.finish()),
        Some(outer) => {
            let mut outer_key = KeyBuilder::new();
            outer_key.push(outer);
            GroupKey::nested(outer_key.finish(), key.finish())
        }
    }
}
