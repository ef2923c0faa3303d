// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! Building blocks shared by the `reqstats` crates: interned identifiers, the decoded shape of
//! an inbound request, the records stored in the event pool, and grouping keys.
//!
//! Generally you should depend on `reqstats` instead, which re-exports the pieces of this crate
//! that make up its public API.

mod error;
pub mod incoming;
mod interner;
pub mod key;
mod record;
mod view;

pub use error::{DecodeError, InternError};
pub use incoming::{IncomingRequest, IncomingTimer};
pub use interner::{InternId, Interner, TagId, WordId};
pub use key::{GroupKey, KeyBuilder};
pub use record::{Attribute, RequestId, RequestRecord, TagPair, TimerRecord, TimerSpan, limits};
pub use view::RequestView;
