// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::ReportHandle;

/// Live reports by canonical id. Base reports are created with the engine and never leave;
/// on-demand reports come and go.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    base: Vec<ReportHandle>,
    on_demand: BTreeMap<Box<str>, ReportHandle>,
}

impl Registry {
    pub(crate) fn new(base: Vec<ReportHandle>) -> Self {
        Self {
            base,
            on_demand: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<&ReportHandle> {
        self.base
            .iter()
            .find(|report| report.id() == id)
            .or_else(|| self.on_demand.get(id))
    }

    pub(crate) fn insert(&mut self, report: ReportHandle) {
        self.on_demand.insert(report.id().into(), report);
    }

    /// Base reports first, then on-demand ones by id.
    pub(crate) fn all(&self) -> Vec<ReportHandle> {
        self.base
            .iter()
            .chain(self.on_demand.values())
            .map(Arc::clone)
            .collect()
    }

    pub(crate) fn base_len(&self) -> usize {
        self.base.len()
    }

    pub(crate) fn on_demand_len(&self) -> usize {
        self.on_demand.len()
    }

    /// Tear down on-demand reports not looked up within `timeout` of `now`.
    pub(crate) fn sweep_idle(&mut self, now: SystemTime, timeout: Duration) -> Vec<ReportHandle> {
        let Some(cutoff) = now.checked_sub(timeout) else {
            return Vec::new();
        };
        let idle: Vec<Box<str>> = self
            .on_demand
            .iter()
            .filter(|(_, report)| report.idle_since(cutoff))
            .map(|(id, _)| id.clone())
            .collect();
        idle.iter()
            .filter_map(|id| self.on_demand.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use assert2::check;
    use reqstats_aggregation::{AggregationIndex, HistogramLayout};
    use reqstats_core::{Interner, TagId};

    use super::*;
    use crate::{Report, ReportDefinition};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn report(id: &str, now: SystemTime) -> ReportHandle {
        let definition: ReportDefinition = id.parse().unwrap();
        let grouping = definition.grouping(&Interner::<TagId>::new()).unwrap();
        let index =
            AggregationIndex::new(grouping, definition.filter().clone(), HistogramLayout::default())
                .unwrap();
        Arc::new(Report::new(definition, index, now))
    }

    #[test]
    fn lookup_covers_both_kinds() {
        let mut registry = Registry::new(vec![report("info", at(0)), report("by_host", at(0))]);
        registry.insert(report("by_host?min=10", at(0)));

        check!(registry.get("by_host").is_some());
        check!(registry.get("by_host?min=10").is_some());
        check!(registry.get("by_script").is_none());
        let ids: Vec<_> = registry.all().iter().map(|r| r.id().to_owned()).collect();
        check!(ids == ["info", "by_host", "by_host?min=10"]);
    }

    #[test]
    fn sweep_only_takes_idle_on_demand_reports() {
        let mut registry = Registry::new(vec![report("info", at(0))]);
        registry.insert(report("by_host?min=10", at(0)));
        registry.insert(report("by_script?min=10", at(0)));
        registry.get("by_script?min=10").unwrap().touch(at(50));

        let swept = registry.sweep_idle(at(70), Duration::from_secs(60));
        check!(swept.len() == 1);
        check!(swept[0].id() == "by_host?min=10");
        check!(registry.on_demand_len() == 1);
        check!(registry.base_len() == 1);

        check!(registry.sweep_idle(at(10), Duration::from_secs(60)).is_empty());
    }
}
