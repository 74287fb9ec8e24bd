//! GPFS metrics exporter library.
//!
//! Shared by the two binaries: the long-running scrape server
//! (`gpfs_exporter`) and the one-shot batch capacity exporter
//! (`gpfs_mmdf_exporter`). The [`collectors::Exporter`] type is the
//! entry point: it holds the enabled collector set and produces a fresh
//! metrics registry per scrape.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod handlers;
pub mod parser;
pub mod runner;

/// Helpers for inspecting a gathered registry in tests.
pub mod testutil {
    use prometheus::proto::MetricType;
    use prometheus::Registry;

    fn labels_match(metric: &prometheus::proto::Metric, labels: &[(&str, &str)]) -> bool {
        labels.iter().all(|(name, value)| {
            metric
                .get_label()
                .iter()
                .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
        })
    }

    /// Value of the sample with the given family name whose labels contain
    /// every given pair. None when no such sample exists.
    pub fn sample_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        for family in registry.gather() {
            if family.get_name() != name {
                continue;
            }
            for metric in family.get_metric() {
                if !labels_match(metric, labels) {
                    continue;
                }
                return Some(match family.get_field_type() {
                    MetricType::GAUGE => metric.gauge.value(),
                    MetricType::COUNTER => metric.counter.value(),
                    _ => metric.untyped.value(),
                });
            }
        }
        None
    }

    /// Cumulative (upper_bound, count) pairs of a histogram sample, plus its
    /// total observation count.
    pub fn histogram_buckets(
        registry: &Registry,
        name: &str,
        labels: &[(&str, &str)],
    ) -> Option<(u64, Vec<(f64, u64)>)> {
        for family in registry.gather() {
            if family.get_name() != name {
                continue;
            }
            for metric in family.get_metric() {
                if !labels_match(metric, labels) {
                    continue;
                }
                let histogram = metric.get_histogram();
                let buckets = histogram
                    .get_bucket()
                    .iter()
                    .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                    .collect();
                return Some((histogram.get_sample_count(), buckets));
            }
        }
        None
    }

    /// Number of samples in the given family across all label combinations.
    pub fn family_size(registry: &Registry, name: &str) -> usize {
        registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .map(|family| family.get_metric().len())
            .sum()
    }
}
