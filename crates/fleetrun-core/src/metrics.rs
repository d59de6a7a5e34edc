//! Aggregation of per-task numeric results into job-level metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Job-level metrics folded from task results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    /// Number of task results merged so far.
    pub samples: u64,

    /// Running average per metric name.
    pub mean: BTreeMap<String, f64>,

    /// Most recently reported value per metric name.
    pub latest: BTreeMap<String, f64>,

    /// Number of observations behind each running average.
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

impl AggregateMetrics {
    /// Merge one task's metrics into the aggregate.
    ///
    /// Metrics are averaged per name, so a result that omits a metric does
    /// not drag that metric's mean toward zero.
    pub fn merge(&mut self, metrics: &BTreeMap<String, f64>) {
        self.samples += 1;
        for (name, value) in metrics {
            if !value.is_finite() {
                continue;
            }
            let count = self.counts.entry(name.clone()).or_insert(0);
            *count += 1;
            let mean = self.mean.entry(name.clone()).or_insert(0.0);
            *mean += (value - *mean) / *count as f64;
            self.latest.insert(name.clone(), *value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_running_average() {
        let mut agg = AggregateMetrics::default();
        agg.merge(&sample(&[("loss", 2.0), ("accuracy", 0.5)]));
        agg.merge(&sample(&[("loss", 1.0)]));
        agg.merge(&sample(&[("loss", 0.0), ("accuracy", 0.7)]));

        assert_eq!(agg.samples, 3);
        assert!((agg.mean["loss"] - 1.0).abs() < 1e-9);
        assert!((agg.mean["accuracy"] - 0.6).abs() < 1e-9);
        assert_eq!(agg.latest["loss"], 0.0);
        assert_eq!(agg.counts["accuracy"], 2);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let mut agg = AggregateMetrics::default();
        agg.merge(&sample(&[("loss", f64::NAN)]));
        assert_eq!(agg.samples, 1);
        assert!(agg.mean.is_empty());
    }
}
