// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Grouping keys.
//!
//! A key is the `|`-joined list of a bucket's grouping values. Each value is escaped first
//! (`\` becomes `\\`, `|` becomes `\|`) so that distinct tuples never produce the same key, e.g.
//! `("a|b", "c")` and `("a", "b|c")` stay apart.

use std::{borrow::Cow, fmt};

/// Separator between key components.
pub const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// Incrementally builds a key out of components.
///
/// ```
/// use reqstats_core::KeyBuilder;
///
/// let mut key = KeyBuilder::new();
/// key.push("host-1").push("www").push("/index.php");
/// assert_eq!(key.as_str(), "host-1|www|/index.php");
/// ```
#[derive(Clone, Debug, Default)]
pub struct KeyBuilder {
    buf: String,
    components: usize,
}

impl KeyBuilder {
    /// Start an empty key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one component, escaping it.
    pub fn push(&mut self, component: &str) -> &mut Self {
        if self.components > 0 {
            self.buf.push(SEPARATOR);
        }
        self.components += 1;
        if !component.contains([SEPARATOR, ESCAPE]) {
            self.buf.push_str(component);
            return self;
        }
        for c in component.chars() {
            if c == SEPARATOR || c == ESCAPE {
                self.buf.push(ESCAPE);
            }
            self.buf.push(c);
        }
        self
    }

    /// Number of components pushed so far.
    pub fn components(&self) -> usize {
        self.components
    }

    /// The key built so far.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Forget all components, keeping the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.components = 0;
    }

    /// Finish the key.
    pub fn finish(self) -> Box<str> {
        self.buf.into_boxed_str()
    }
}

/// Split a key back into its unescaped components.
pub fn components(key: &str) -> Components<'_> {
    Components { rest: Some(key) }
}

/// Iterator returned by [`components`].
#[derive(Clone, Debug)]
pub struct Components<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Components<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        let mut escaped = false;
        let mut end = None;
        let mut needs_unescape = false;
        for (i, c) in rest.char_indices() {
            if escaped {
                escaped = false;
            } else if c == ESCAPE {
                escaped = true;
                needs_unescape = true;
            } else if c == SEPARATOR {
                end = Some(i);
                break;
            }
        }
        let (raw, next) = match end {
            Some(i) => (&rest[..i], Some(&rest[i + SEPARATOR.len_utf8()..])),
            None => (rest, None),
        };
        self.rest = next;
        if !needs_unescape {
            return Some(Cow::Borrowed(raw));
        }
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c == ESCAPE {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else {
                out.push(c);
            }
        }
        Some(Cow::Owned(out))
    }
}

/// Position of a bucket within a report.
///
/// Single-level reports only use the inner key. Two-level reports first group by an outer key
/// (e.g. the script name) and then by the inner key. Keys order by outer key first, then inner
/// key, both bytewise.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    outer: Option<Box<str>>,
    inner: Box<str>,
}

impl GroupKey {
    /// Key of a single-level report.
    pub fn flat(inner: impl Into<Box<str>>) -> Self {
        Self {
            outer: None,
            inner: inner.into(),
        }
    }

    /// Key of a two-level report.
    pub fn nested(outer: impl Into<Box<str>>, inner: impl Into<Box<str>>) -> Self {
        Self {
            outer: Some(outer.into()),
            inner: inner.into(),
        }
    }

    /// The outer key of a two-level report.
    pub fn outer(&self) -> Option<&str> {
        self.outer.as_deref()
    }

    /// The bucket key (the inner key of a two-level report).
    pub fn inner(&self) -> &str {
        &self.inner
    }

    /// Split into outer and inner key.
    pub fn into_parts(self) -> (Option<Box<str>>, Box<str>) {
        (self.outer, self.inner)
    }

    /// All unescaped grouping values, outer first.
    pub fn values(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.outer
            .as_deref()
            .into_iter()
            .flat_map(components)
            .chain(components(&self.inner))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(outer) = &self.outer {
            write!(f, "{outer}{SEPARATOR}")?;
        }
        f.write_str(&self.inner)
    }
}
