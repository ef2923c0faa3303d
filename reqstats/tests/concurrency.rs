// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Submitters, readers and the driver running at the same time.

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use assert2::check;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reqstats::{Driver, Engine, EngineConfig, GroupKey, IncomingRequest, Timer};

const SUBMITTERS: u64 = 4;
const PER_SUBMITTER: u64 = 500;
const RACERS: usize = 8;
const ROUNDS: u64 = 20;

fn random_request(rng: &mut ChaCha8Rng) -> IncomingRequest {
    let script = format!("/{}.php", rng.random_range(0..20));
    let user = rng.random_range(0..5).to_string();
    IncomingRequest::builder(script)
        .hostname(format!("web{}", rng.random_range(0..3)))
        .request_time(Duration::from_micros(rng.random_range(1..50_000)))
        .timer(Timer::new(Duration::from_millis(1)).tag("user_id", user))
        .build()
}

#[test]
fn readers_always_see_consistent_reports() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let engine = Arc::new(
        Engine::new(
            EngineConfig::new()
                .merge_interval(Duration::from_millis(1))
                .report_parallelism(2),
        )
        .unwrap(),
    );
    let (driver, handle) = Driver::start(Arc::clone(&engine)).unwrap();
    // make sure the tag exists before readers ask for tag reports
    driver.submit(random_request(&mut ChaCha8Rng::seed_from_u64(0)));
    driver.flush();

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        for reader in 0..3 {
            let (engine, done) = (&engine, &done);
            scope.spawn(move || {
                let id = ["by_script", "by_host_script", "tag_report:user_id"][reader];
                while !done.load(Ordering::Relaxed) {
                    let report = engine.report_lookup(id).unwrap();
                    let index = report.read();
                    let counted: u64 = index.iter().map(|b| b.bucket().count()).sum();
                    if id.starts_with("by_") {
                        assert_eq!(counted, index.totals().count());
                    }
                    assert!(index.iter().all(|b| b.bucket().count() > 0));
                    drop(index);

                    // page without holding the lock
                    let mut cursor: Option<GroupKey> = None;
                    loop {
                        let next = match &cursor {
                            None => report.iterate_first(),
                            Some(key) => report.iterate_next(key),
                        };
                        let Some((key, _)) = next else { break };
                        if let Some(previous) = &cursor {
                            assert!(previous < &key);
                        }
                        cursor = Some(key);
                    }
                }
            });
        }

        let submitters: Vec<_> = (0..SUBMITTERS)
            .map(|seed| {
                let driver = driver.clone();
                scope.spawn(move || {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed + 1);
                    for _ in 0..PER_SUBMITTER {
                        driver.submit(random_request(&mut rng));
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().unwrap();
        }
        driver.flush();
        done.store(true, Ordering::Relaxed);
    });

    let expected = SUBMITTERS * PER_SUBMITTER + 1;
    check!(engine.stats().accepted == expected);
    check!(engine.report_lookup("info").unwrap().totals().count() == expected);
    let by_user = engine.report_lookup("tag_info:user_id").unwrap();
    check!(by_user.totals().count() == expected);
    handle.shut_down();
}

#[test]
fn racing_lookups_create_one_report() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let engine = Arc::new(
        Engine::new(
            EngineConfig::new()
                .merge_interval(Duration::from_millis(1))
                .tag_report_timeout(None),
        )
        .unwrap(),
    );
    let (driver, handle) = Driver::start(Arc::clone(&engine)).unwrap();

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        {
            let (driver, done) = (&driver, &done);
            scope.spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(7);
                while !done.load(Ordering::Relaxed) {
                    driver.submit(random_request(&mut rng));
                    thread::yield_now();
                }
            });
        }

        for round in 0..ROUNDS {
            // a new id every round, so every round races a creation
            let id = format!("by_script?min={}", round + 1);
            let barrier = Barrier::new(RACERS);
            let reports: Vec<_> = thread::scope(|racers| {
                let lookups: Vec<_> = (0..RACERS)
                    .map(|_| {
                        let (engine, barrier, id) = (&engine, &barrier, &id);
                        racers.spawn(move || {
                            barrier.wait();
                            engine.report_lookup(id).unwrap()
                        })
                    })
                    .collect();
                lookups.into_iter().map(|l| l.join().unwrap()).collect()
            });

            let first = &reports[0];
            check!(reports.iter().all(|report| Arc::ptr_eq(first, report)));
            check!(first.id() == id);
            check!(engine.stats().on_demand_reports == round as usize + 1);

            let index = first.read();
            let counted: u64 = index.iter().map(|b| b.bucket().count()).sum();
            check!(counted == index.totals().count());
        }
        done.store(true, Ordering::Relaxed);
    });

    driver.flush();
    for report in engine.reports() {
        let index = report.read();
        let counted: u64 = index.iter().map(|b| b.bucket().count()).sum();
        if report.id().starts_with("by_") {
            check!(counted == index.totals().count(), "{}", report.id());
        }
    }
    handle.shut_down();
}
