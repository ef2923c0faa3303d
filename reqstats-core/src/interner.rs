// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, hash::BuildHasher, marker::PhantomData};

use hashbrown::{DefaultHashBuilder, HashTable};

use crate::InternError;

/// A small integer identifying a string held by an [`Interner`].
pub trait InternId: Copy + Eq + fmt::Debug {
    /// Build an id from its position in the interner.
    fn from_raw(raw: u32) -> Self;
    /// Position of this id in the interner.
    fn raw(self) -> u32;
}

macro_rules! intern_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl InternId for $name {
            fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

intern_id!(
    /// Id of an interned tag value ("word").
    WordId
);
intern_id!(
    /// Id of an interned tag name.
    TagId
);

/// Append-only string interner.
///
/// Strings are stored once and looked up through a hash table of positions, so the table never
/// holds a second copy of the key. Ids are dense and stable for the lifetime of the interner;
/// resolving an id is a plain index.
///
/// The interner has no internal locking. It is meant to be owned by a single writer (the event
/// pool, under its write lock) and read through shared references.
pub struct Interner<I> {
    strings: Vec<Box<str>>,
    index: HashTable<u32>,
    hasher: DefaultHashBuilder,
    limit: u32,
    _id: PhantomData<fn() -> I>,
}

impl<I: InternId> Default for Interner<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: InternId> fmt::Debug for Interner<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interner")
            .field("len", &self.strings.len())
            .field("limit", &self.limit)
            .finish()
    }
}

impl<I: InternId> Interner<I> {
    /// Create an interner that may hold up to `u32::MAX` strings.
    pub fn new() -> Self {
        Self::with_limit(u32::MAX)
    }

    /// Create an interner that refuses new strings once it holds `limit` of them.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            strings: Vec::new(),
            index: HashTable::new(),
            hasher: DefaultHashBuilder::default(),
            limit,
            _id: PhantomData,
        }
    }

    /// Return the id for `value`, allocating one if this is the first time it is seen.
    pub fn intern(&mut self, value: &str) -> Result<I, InternError> {
        let hash = self.hasher.hash_one(value);
        let strings = &self.strings;
        if let Some(&slot) = self
            .index
            .find(hash, |&slot| &*strings[slot as usize] == value)
        {
            return Ok(I::from_raw(slot));
        }

        if self.strings.len() >= self.limit as usize {
            return Err(InternError { limit: self.limit });
        }
        // len < limit <= u32::MAX
        let slot = self.strings.len() as u32;
        self.strings.push(value.into());

        let (strings, hasher) = (&self.strings, &self.hasher);
        self.index
            .insert_unique(hash, slot, |&s| hasher.hash_one(&*strings[s as usize]));
        Ok(I::from_raw(slot))
    }

    /// Look up an already-interned string without allocating.
    pub fn get(&self, value: &str) -> Option<I> {
        let hash = self.hasher.hash_one(value);
        self.index
            .find(hash, |&slot| &*self.strings[slot as usize] == value)
            .map(|&slot| I::from_raw(slot))
    }

    /// The string behind `id`, or `None` if the id did not come from this interner.
    pub fn resolve(&self, id: I) -> Option<&str> {
        self.strings.get(id.raw() as usize).map(|s| &**s)
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Maximum number of strings this interner accepts.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// All interned strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &str)> + '_ {
        self.strings
            .iter()
            .enumerate()
            .map(|(slot, s)| (I::from_raw(slot as u32), &**s))
    }
}
