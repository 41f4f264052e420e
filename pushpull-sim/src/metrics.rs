//! Collected announcements and metrics reports.

use std::time::Duration;

use pushpull_core::{ClientId, MetricsReport};

/// Free-form line a node announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Announcing node
    pub node: ClientId,
    /// Simulation time of the announcement
    pub at: Duration,
    /// What the node said
    pub text: String,
}

/// One merged metrics gather of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsRecord {
    /// Reporting node
    pub node: ClientId,
    /// Simulation time of the gather
    pub at: Duration,
    /// Merged gather result
    pub report: MetricsReport,
}

/// Everything the nodes reported, in arrival order.
#[derive(Debug, Default)]
pub struct MetricsLog {
    announcements: Vec<Announcement>,
    records: Vec<MetricsRecord>,
}

impl MetricsLog {
    pub(crate) fn announce(&mut self, node: ClientId, at: Duration, text: &str) {
        self.announcements.push(Announcement {
            node,
            at,
            text: text.to_string(),
        });
    }

    pub(crate) fn record(&mut self, node: ClientId, at: Duration, report: &MetricsReport) {
        self.records.push(MetricsRecord {
            node,
            at,
            report: report.clone(),
        });
    }

    /// All announcements.
    pub fn announcements(&self) -> &[Announcement] {
        &self.announcements
    }

    /// All metrics records.
    pub fn records(&self) -> &[MetricsRecord] {
        &self.records
    }

    /// Records of one node.
    pub fn records_for(&self, node: ClientId) -> impl Iterator<Item = &MetricsRecord> {
        self.records.iter().filter(move |record| record.node == node)
    }

    /// Values of `key` in the latest record of `node`.
    pub fn latest(&self, node: ClientId, key: &str) -> Vec<String> {
        self.records_for(node)
            .last()
            .map(|record| {
                record
                    .report
                    .get_all(key)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
