// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Randomized sliding-window runs: an index maintained by adding new requests and removing
//! old ones must always look exactly like one built from scratch out of the current window.

mod common;

use std::collections::VecDeque;

use assert2::check;
use common::{Fixture, Req, req};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use reqstats_aggregation::{AggregationIndex, Grouping, HistogramLayout, ReportFilter, TagScope};
use reqstats_core::Attribute;
use rstest::rstest;

const SCRIPTS: [&str; 4] = ["/a.php", "/b.php", "/c|d.php", "/e.php"];
const HOSTS: [&str; 3] = ["web-1", "web-2", "web-3"];
const USERS: [&str; 3] = ["1", "2", "42"];
const GROUPS: [&str; 2] = ["db", "cache"];

fn random_request(rng: &mut ChaCha8Rng) -> Req {
    let mut r = req(
        SCRIPTS[rng.random_range(0..SCRIPTS.len())],
        rng.random_range(0..3000),
    )
    .host(HOSTS[rng.random_range(0..HOSTS.len())])
    .status([200, 404, 500][rng.random_range(0..3)]);
    if rng.random_bool(0.5) {
        r = r.tag("country", ["nl", "de"][rng.random_range(0..2)]);
    }
    for _ in 0..rng.random_range(0..4) {
        let user = USERS[rng.random_range(0..USERS.len())];
        let hits = rng.random_range(1..5);
        let value = rng.random_range(0..500);
        if rng.random_bool(0.5) {
            r = r.timer(value, hits, &[("user_id", user)]);
        } else {
            let group = GROUPS[rng.random_range(0..GROUPS.len())];
            r = r.timer(value, hits, &[("group", group), ("user_id", user)]);
        }
    }
    r
}

fn groupings(fx: &Fixture) -> Vec<(Grouping, ReportFilter)> {
    let user = fx.tag("user_id");
    let group = fx.tag("group");
    let country = fx.tag("country");
    vec![
        (Grouping::Totals, ReportFilter::new()),
        (
            Grouping::attributes(&[Attribute::Script]).unwrap(),
            ReportFilter::new(),
        ),
        (
            Grouping::attributes(&[Attribute::Status, Attribute::Host, Attribute::Script]).unwrap(),
            ReportFilter::new(),
        ),
        (
            Grouping::timer_tags(&[user], TagScope::Global).unwrap(),
            ReportFilter::new(),
        ),
        (
            Grouping::timer_tags(&[group, user], TagScope::PerScript).unwrap(),
            ReportFilter::new(),
        ),
        (
            Grouping::timer_tags(&[user], TagScope::PerScriptHostServer).unwrap(),
            ReportFilter::new().min_time(common::ms(200)),
        ),
        (
            Grouping::request_tags(&[country], TagScope::PerHost).unwrap(),
            ReportFilter::new(),
        ),
        (
            Grouping::attributes(&[Attribute::Script]).unwrap(),
            ReportFilter::new()
                .max_time(common::ms(1500))
                .require_tag("country", "nl"),
        ),
    ]
}

fn check_consistent(index: &AggregationIndex) {
    let mut count = 0;
    for entry in index.iter() {
        check!(entry.bucket().count() > 0, "bucket {} is empty", entry.group_key());
        count += entry.bucket().count();
    }
    if !index.grouping().is_totals() {
        check!(count == index.totals().count());
    }
    check!(index.iter().count() == index.len());
}

fn check_same(incremental: &AggregationIndex, fresh: &AggregationIndex) {
    check!(incremental.totals().stats() == fresh.totals().stats());
    check!(incremental.totals().histogram().counts() == fresh.totals().histogram().counts());
    let left: Vec<_> = incremental.iter().collect();
    let right: Vec<_> = fresh.iter().collect();
    check!(left.len() == right.len());
    for (l, r) in left.iter().zip(&right) {
        check!(l.group_key() == r.group_key());
        check!(l.bucket().stats() == r.bucket().stats());
        check!(l.bucket().histogram().counts() == r.bucket().histogram().counts());
    }
}

#[rstest]
#[case::small_window(1, 5, 200)]
#[case::large_window(2, 40, 400)]
#[case::window_of_one(3, 1, 50)]
fn incremental_matches_rebuild(#[case] seed: u64, #[case] window: usize, #[case] steps: usize) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut fx = Fixture::new();
    // intern every tag up front so groupings can refer to them
    fx.push(req("/warmup.php", 0).tag("country", "nl").timer(
        0,
        1,
        &[("group", "db"), ("user_id", "1")],
    ));

    let definitions = groupings(&fx);
    let mut indexes: Vec<_> = definitions
        .iter()
        .map(|(grouping, filter)| {
            AggregationIndex::new(grouping.clone(), filter.clone(), HistogramLayout::default())
                .unwrap()
        })
        .collect();

    let mut live = VecDeque::new();
    for step in 0..steps {
        let added = fx.push(random_request(&mut rng));
        for index in &mut indexes {
            index.add(&fx.view(added));
        }
        live.push_back(added);
        while live.len() > window {
            let expired = live.pop_front().unwrap();
            for index in &mut indexes {
                index.remove(&fx.view(expired));
            }
        }

        for index in &indexes {
            check_consistent(index);
        }
        if step % 25 == 0 || step + 1 == steps {
            for (index, (grouping, filter)) in indexes.iter().zip(&definitions) {
                let mut fresh = AggregationIndex::new(
                    grouping.clone(),
                    filter.clone(),
                    HistogramLayout::default(),
                )
                .unwrap();
                for &e in &live {
                    fresh.add(&fx.view(e));
                }
                check_same(index, &fresh);
            }
        }
    }

    // draining the window empties every report
    while let Some(expired) = live.pop_front() {
        for index in &mut indexes {
            index.remove(&fx.view(expired));
        }
    }
    for index in &indexes {
        check!(index.is_empty());
        check!(index.totals().is_empty());
    }
}
