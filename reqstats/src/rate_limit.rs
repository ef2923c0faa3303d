// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{sync::OnceLock, time::Instant};

// pub(crate) so every expansion of the macro shares one epoch
#[doc(hidden)]
pub(crate) fn seconds_since_start() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    Instant::now()
        .duration_since(*EPOCH.get_or_init(Instant::now))
        .as_secs()
}

/// `throttled!(interval, |suppressed| expr)` evaluates `expr` at most once every `interval`
/// across all threads, binding `suppressed` to the number of calls skipped since the last time
/// it ran.
///
/// Used for diagnostics on the merge path, which can otherwise repeat once per event. The first
/// occurrence is logged right away; later ones are folded into the next message's count.
///
/// Throttling is per call site. Only whole seconds are supported; shorter intervals round up to
/// one second.
macro_rules! throttled {
    ($interval:expr, |$suppressed:ident| $call:expr) => {{
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_CALL: AtomicU64 = AtomicU64::new(u64::MIN);
        static SUPPRESSED: AtomicU64 = AtomicU64::new(0);
        let interval: std::time::Duration = $interval;

        let now = $crate::rate_limit::seconds_since_start();
        let next = NEXT_CALL.load(Ordering::Relaxed);
        if next <= now
            && NEXT_CALL
                .compare_exchange(
                    next,
                    now.saturating_add(interval.as_secs().max(1)),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            let $suppressed = SUPPRESSED.swap(0, Ordering::Relaxed);
            $call;
        } else {
            SUPPRESSED.fetch_add(1, Ordering::Relaxed);
        }
    }};
}
pub(crate) use throttled;

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    use assert2::check;

    #[test]
    fn runs_once_then_holds_back() {
        let calls = Cell::new(0u64);
        let call = || throttled!(Duration::MAX, |_suppressed| calls.set(calls.get() + 1));
        call();
        check!(calls.get() == 1);
        for _ in 0..1000 {
            call();
        }
        check!(calls.get() == 1);
    }

    #[test]
    fn reports_suppressed_calls() {
        let seen = Cell::new(Vec::new());
        let call = || {
            throttled!(Duration::from_secs(1), |suppressed| {
                let mut v = seen.take();
                v.push(suppressed);
                seen.set(v);
            })
        };
        call();
        for _ in 0..5 {
            call();
        }
        std::thread::sleep(Duration::from_millis(2100));
        call();
        check!(seen.take() == [0, 5]);
    }

    #[test]
    fn call_sites_are_independent() {
        let calls = Cell::new(0u64);
        throttled!(Duration::MAX, |_s| calls.set(calls.get() + 1));
        throttled!(Duration::MAX, |_s| calls.set(calls.get() + 1));
        check!(calls.get() == 2);
    }
}
