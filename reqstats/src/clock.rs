// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Where the engine gets wall-clock time from.
//!
//! Event timestamps, retention cutoffs and idle-report teardown all read the engine's [`Clock`].
//! Tests swap in a [`fakes::ManualClock`] (feature `test-util`) to move time forward on demand.

use std::{fmt, sync::Arc, time::SystemTime};

/// A source of wall-clock time.
pub trait Time: Send + Sync + fmt::Debug {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// Clock used by an [`Engine`](crate::Engine).
#[derive(Clone, Default)]
pub enum Clock {
    /// [`SystemTime::now`]
    #[default]
    System,
    /// A custom time source
    Custom(Arc<dyn Time>),
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "Clock::System"),
            Self::Custom(_) => write!(f, "Clock::Custom(...)"),
        }
    }
}

impl Clock {
    /// Wrap a custom time source.
    pub fn custom(time: impl Time + 'static) -> Self {
        Self::Custom(Arc::new(time))
    }

    /// The current time.
    pub fn now(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Custom(time) => time.now(),
        }
    }
}

/// Fake clocks for tests.
#[cfg(any(test, feature = "test-util"))]
pub mod fakes {
    use std::{
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, SystemTime},
    };

    use super::Time;

    /// A clock that only moves when told to. Clones share the same time.
    ///
    /// ```
    /// use std::time::{Duration, UNIX_EPOCH};
    /// use reqstats::{Clock, clock::fakes::ManualClock};
    ///
    /// let manual = ManualClock::at(UNIX_EPOCH + Duration::from_secs(1_000));
    /// let clock = Clock::custom(manual.clone());
    /// manual.advance(Duration::from_secs(5));
    /// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1_005));
    /// ```
    #[derive(Clone, Debug)]
    pub struct ManualClock(Arc<Mutex<SystemTime>>);

    impl ManualClock {
        /// Start at `time`.
        pub fn at(time: SystemTime) -> Self {
            Self(Arc::new(Mutex::new(time)))
        }

        /// Jump to `time`, which may be in the past.
        pub fn set(&self, time: SystemTime) {
            *self.0.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            *now += by;
        }
    }

    impl Time for ManualClock {
        fn now(&self) -> SystemTime {
            *self.0.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use assert2::check;

    use super::{Clock, fakes::ManualClock};

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let start = UNIX_EPOCH + Duration::from_secs(10);
        let manual = ManualClock::at(start);
        let clock = Clock::custom(manual.clone());
        check!(clock.now() == start);

        manual.advance(Duration::from_secs(3));
        check!(clock.clone().now() == start + Duration::from_secs(3));
        manual.set(start);
        check!(clock.now() == start);
        check!(format!("{clock:?}") == "Clock::Custom(...)");
    }
}
