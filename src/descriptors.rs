//! Metric descriptor cache.
//!
//! One descriptor per (program, metric), created on first use and reused for
//! every scrape afterwards. The slots are laid out from configuration up
//! front; each slot is a `OnceCell`, so concurrent first callers agree on a
//! single descriptor.

use once_cell::sync::OnceCell;
use prometheus::core::Desc;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::Program;

/// Prefix of every exported metric name.
pub const METRIC_NAMESPACE: &str = "ebpf_exporter";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("metric {metric:?} is not configured for program {program:?}")]
    Unknown { program: String, metric: String },

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

pub struct DescriptorCache {
    slots: HashMap<String, HashMap<String, OnceCell<Desc>>>,
}

impl DescriptorCache {
    pub fn new(programs: &[Program]) -> Self {
        let slots = programs
            .iter()
            .map(|program| {
                let metrics = program
                    .metrics
                    .counters
                    .iter()
                    .map(|c| c.name.clone())
                    .chain(program.metrics.histograms.iter().map(|h| h.name.clone()))
                    .map(|name| (name, OnceCell::new()))
                    .collect();
                (program.name.clone(), metrics)
            })
            .collect();

        Self { slots }
    }

    /// Returns the descriptor for `metric` of `program`, creating it on first use.
    pub fn get_or_create(
        &self,
        program: &str,
        metric: &str,
        help: &str,
        label_names: &[String],
    ) -> Result<&Desc, DescriptorError> {
        let slot = self
            .slots
            .get(program)
            .and_then(|metrics| metrics.get(metric))
            .ok_or_else(|| DescriptorError::Unknown {
                program: program.to_string(),
                metric: metric.to_string(),
            })?;

        let desc = slot.get_or_try_init(|| {
            Desc::new(
                format!("{}_{}", METRIC_NAMESPACE, metric),
                help.to_string(),
                label_names.to_vec(),
                HashMap::new(),
            )
        })?;
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CounterMetric, Metrics};
    use std::path::PathBuf;

    impl DescriptorCache {
        /// Test-only peek at a slot without initializing it.
        fn get(&self, program: &str, metric: &str) -> Option<&Desc> {
            self.slots.get(program)?.get(metric)?.get()
        }
    }

    fn programs() -> Vec<Program> {
        vec![Program {
            name: "bio".into(),
            object: PathBuf::from("/tmp/bio.o"),
            kprobes: Vec::new(),
            kretprobes: Vec::new(),
            metrics: Metrics {
                counters: vec![CounterMetric {
                    name: "bio_requests_total".into(),
                    help: "Block IO requests".into(),
                    table: "counts".into(),
                    labels: Vec::new(),
                }],
                histograms: Vec::new(),
            },
        }]
    }

    fn labels() -> Vec<String> {
        vec!["device".to_string(), "op".to_string()]
    }

    #[test]
    fn test_descriptor_is_created_once() {
        let cache = DescriptorCache::new(&programs());
        assert!(cache.get("bio", "bio_requests_total").is_none());

        let first = cache
            .get_or_create("bio", "bio_requests_total", "Block IO requests", &labels())
            .unwrap();
        assert_eq!(first.fq_name, "ebpf_exporter_bio_requests_total");
        assert_eq!(first.variable_labels, labels());

        let id = first.id;
        for _ in 0..5 {
            let again = cache
                .get_or_create("bio", "bio_requests_total", "Block IO requests", &labels())
                .unwrap();
            assert_eq!(again.id, id);
        }
    }

    #[test]
    fn test_concurrent_first_callers_share_descriptor() {
        let cache = DescriptorCache::new(&programs());

        let ids: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let desc = cache
                            .get_or_create("bio", "bio_requests_total", "help", &labels())
                            .unwrap();
                        desc as *const Desc as usize
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap() as u64)
                .collect()
        });

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_unknown_metric() {
        let cache = DescriptorCache::new(&programs());
        let err = cache
            .get_or_create("bio", "nope", "help", &[])
            .unwrap_err();
        assert!(matches!(err, DescriptorError::Unknown { .. }));
    }

    #[test]
    fn test_invalid_name_is_an_error() {
        let mut programs = programs();
        programs[0].metrics.counters[0].name = "bad-name".into();
        let cache = DescriptorCache::new(&programs);

        let err = cache.get_or_create("bio", "bad-name", "help", &[]).unwrap_err();
        assert!(matches!(err, DescriptorError::Prometheus(_)));
        assert!(cache.get("bio", "bad-name").is_none());
    }
}
