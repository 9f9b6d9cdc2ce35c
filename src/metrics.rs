//! Prometheus self-metrics for ebpf-exporter.
//!
//! These describe the exporter itself, not the kernel tables it exports, and
//! live on the same registry as the table collector.

use prometheus::{Gauge, IntCounterVec, IntGaugeVec, Opts, Registry};

#[derive(Clone)]
pub struct ExporterMetrics {
    pub scrape_duration_seconds: Gauge,
    pub table_read_errors_total: IntCounterVec, // labels: program, table
    pub attached_probes: IntGaugeVec,           // labels: program, kind
}

impl ExporterMetrics {
    /// Creates and registers all self-metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let scrape_duration_seconds = Gauge::new(
            "ebpf_exporter_scrape_duration_seconds",
            "Time spent reading kernel tables during the last scrape",
        )?;
        let table_read_errors_total = IntCounterVec::new(
            Opts::new(
                "ebpf_exporter_table_read_errors_total",
                "Kernel table reads that failed and left a metric out of a scrape",
            ),
            &["program", "table"],
        )?;
        let attached_probes = IntGaugeVec::new(
            Opts::new(
                "ebpf_exporter_attached_probes",
                "Probes attached per program and kind",
            ),
            &["program", "kind"],
        )?;

        registry.register(Box::new(scrape_duration_seconds.clone()))?;
        registry.register(Box::new(table_read_errors_total.clone()))?;
        registry.register(Box::new(attached_probes.clone()))?;

        Ok(Self {
            scrape_duration_seconds,
            table_read_errors_total,
            attached_probes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered() {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry).unwrap();

        metrics
            .table_read_errors_total
            .with_label_values(&["bio", "counts"])
            .inc();
        metrics
            .attached_probes
            .with_label_values(&["bio", "kprobe"])
            .set(3);

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert!(names.contains(&"ebpf_exporter_table_read_errors_total".to_string()));
        assert!(names.contains(&"ebpf_exporter_attached_probes".to_string()));
        assert!(names.contains(&"ebpf_exporter_scrape_duration_seconds".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ExporterMetrics::new(&registry).unwrap();
        assert!(ExporterMetrics::new(&registry).is_err());
    }
}
