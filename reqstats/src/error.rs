// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use reqstats_aggregation::DefinitionError;

/// Why a report couldn't be looked up or created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// No base report or report kind by this name.
    UnknownReport(String),
    /// A tag named in the report id hasn't been seen in any event yet.
    UnknownTag(String),
    /// The report id doesn't parse.
    Malformed {
        /// the offending id
        id: String,
        /// what is wrong with it
        reason: &'static str,
    },
    /// The report id parses but describes an invalid report.
    Definition(DefinitionError),
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::UnknownReport(name) => write!(f, "unknown report `{name}`"),
            LookupError::UnknownTag(name) => write!(f, "unknown tag `{name}`"),
            LookupError::Malformed { id, reason } => write!(f, "malformed report id `{id}`: {reason}"),
            LookupError::Definition(err) => write!(f, "invalid report: {err}"),
        }
    }
}

impl std::error::Error for LookupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LookupError::Definition(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DefinitionError> for LookupError {
    fn from(err: DefinitionError) -> Self {
        LookupError::Definition(err)
    }
}

/// An [`EngineConfig`](crate::EngineConfig) that can't be used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be positive is zero (or empty).
    Zero {
        /// field name
        field: &'static str,
    },
    /// The histogram range and bucket count don't fit together.
    Histogram(DefinitionError),
    /// The histogram buckets would be narrower than a millisecond.
    HistogramResolution {
        /// `histogram_max_ms`
        max_ms: u64,
        /// `histogram_buckets`
        buckets: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Zero { field } => write!(f, "`{field}` must not be zero"),
            ConfigError::Histogram(err) => write!(f, "invalid histogram: {err}"),
            ConfigError::HistogramResolution { max_ms, buckets } => write!(
                f,
                "{buckets} histogram buckets over {max_ms}ms are narrower than a millisecond"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Histogram(err) => Some(err),
            ConfigError::Zero { .. } | ConfigError::HistogramResolution { .. } => None,
        }
    }
}
