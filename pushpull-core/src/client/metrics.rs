//! Periodic metrics gathering.

use std::fmt;

use crate::events::{Channel, MetricsMap};
use crate::services::ClientTimer;

use super::Client;

/// Merged output of one gather.
///
/// Keys may repeat when several strategies report the same metric; entries
/// are ordered by key, then by subscription order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsReport {
    entries: Vec<(String, String)>,
}

impl MetricsReport {
    /// Merges per-subscriber maps given in subscription order.
    pub fn merge(maps: Vec<MetricsMap>) -> Self {
        let mut entries: Vec<(String, String)> = maps.into_iter().flatten().collect();
        // Stable sort keeps subscription order among equal keys.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    /// All values recorded under `key`, in subscription order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Entries in report order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl Client {
    /// Collects metrics from every subscriber and hands them to the sink.
    pub fn collect_metrics(&mut self) -> MetricsReport {
        let maps = Channel::fire_in(self, |c| &c.events.gather_metrics, &());
        let report = MetricsReport::merge(maps);
        let now = self.now();
        self.services.metrics.record(self.node.id, now, &report);
        report
    }

    /// Gather timer body: collect, then re-arm with the current period.
    pub(crate) fn gather_metrics(&mut self) {
        let report = self.collect_metrics();
        tracing::debug!(node = %self.node.id, %report, "Metrics gathered");
        let period = self.config.gather_metrics_period;
        self.gather_timer = Some(self.schedule(period, ClientTimer::GatherMetrics));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> MetricsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_keeps_duplicate_keys_in_subscription_order() {
        let report = MetricsReport::merge(vec![
            map(&[("fluency", "1"), ("zeta", "z")]),
            map(&[("fluency", "2"), ("alpha", "a")]),
        ]);

        assert_eq!(report.get_all("fluency"), vec!["1", "2"]);
        let keys: Vec<&str> = report.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "fluency", "fluency", "zeta"]);
    }

    #[test]
    fn test_empty_merge_displays_nothing() {
        let report = MetricsReport::merge(Vec::new());
        assert!(report.is_empty());
        assert_eq!(report.to_string(), "");
    }
}
