// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use reqstats_aggregation::Grouping;
use reqstats_core::Attribute::{self, Host, Schema, Script, Server, Status};

/// One of the reports every engine maintains from startup on.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct BaseReport {
    id: &'static str,
    attributes: &'static [Attribute],
}

const fn base(id: &'static str, attributes: &'static [Attribute]) -> BaseReport {
    BaseReport { id, attributes }
}

/// The base reports, in the order [`Engine::reports`](crate::Engine::reports) lists them.
pub const BASE_REPORTS: &[BaseReport] = &[
    base("info", &[]),
    base("by_script", &[Script]),
    base("by_server", &[Server]),
    base("by_host", &[Host]),
    base("by_server_script", &[Server, Script]),
    base("by_host_script", &[Host, Script]),
    base("by_host_server", &[Host, Server]),
    base("by_host_server_script", &[Host, Server, Script]),
    base("by_status", &[Status]),
    base("by_status_script", &[Status, Script]),
    base("by_status_server", &[Status, Server]),
    base("by_status_host", &[Status, Host]),
    base("by_status_host_script", &[Status, Host, Script]),
    base("by_schema", &[Schema]),
    base("by_schema_script", &[Schema, Script]),
    base("by_schema_server", &[Schema, Server]),
    base("by_schema_host", &[Schema, Host]),
    base("by_schema_host_script", &[Schema, Host, Script]),
    base("by_status_schema_host", &[Status, Schema, Host]),
];

impl BaseReport {
    /// Look up a base report by id.
    pub fn find(id: &str) -> Option<&'static BaseReport> {
        BASE_REPORTS.iter().find(|report| report.id == id)
    }

    /// Report id, `info` or `by_<attributes>`.
    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Attributes forming the bucket key, outermost first. Empty for `info`.
    pub fn attributes(&self) -> &'static [Attribute] {
        self.attributes
    }

    /// The grouping the report's index uses.
    pub fn grouping(&self) -> Grouping {
        Grouping::attributes(self.attributes).unwrap_or(Grouping::Totals)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert2::check;

    use super::*;

    #[test]
    fn ids_match_attributes() {
        for report in BASE_REPORTS.iter().skip(1) {
            let names: Vec<_> = report.attributes().iter().map(|a| a.name()).collect();
            check!(report.id() == format!("by_{}", names.join("_")));
        }
        let unique: HashSet<_> = BASE_REPORTS.iter().map(|r| r.id()).collect();
        check!(unique.len() == BASE_REPORTS.len());
    }

    #[test]
    fn info_only_keeps_totals() {
        let info = BaseReport::find("info").unwrap();
        check!(info.grouping() == Grouping::Totals);
        check!(!BaseReport::find("by_host_script").unwrap().grouping().is_nested());
        check!(BaseReport::find("by_nothing").is_none());
    }
}
