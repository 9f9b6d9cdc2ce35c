//! Prometheus collector over attached kernel tables.
//!
//! Every scrape re-reads the configured tables: counters become one sample
//! per row, histograms are grouped and made cumulative first. A table that
//! cannot be read leaves its metric out of the scrape and bumps
//! `ebpf_exporter_table_read_errors_total`; the rest of the scrape goes on.

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, MetricFamily, MetricType};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

use crate::attach::Attachments;
use crate::config::{Label, Program};
use crate::decoder::LabelDecoder;
use crate::descriptors::DescriptorCache;
use crate::dump::{ProgramTables, TableDump};
use crate::histogram::{cumulative, group_rows};
use crate::metrics::ExporterMetrics;
use crate::table::{read_table, MetricValue, TableReadError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("module for program {0:?} is not attached")]
    NotAttached(String),

    #[error("error getting values for table {table:?} of program {program:?}: {source}")]
    Table {
        program: String,
        table: String,
        #[source]
        source: TableReadError,
    },
}

struct Inner {
    programs: Vec<Program>,
    attachments: Attachments,
    decoder: Box<dyn LabelDecoder>,
    descs: DescriptorCache,
    metrics: ExporterMetrics,
}

/// Collector exporting the tables of every attached program.
///
/// Cheap to clone; clones share the attachments and descriptor cache.
#[derive(Clone)]
pub struct Exporter {
    inner: Arc<Inner>,
}

impl Exporter {
    pub fn new(
        programs: Vec<Program>,
        attachments: Attachments,
        decoder: impl LabelDecoder + 'static,
        metrics: ExporterMetrics,
    ) -> Self {
        let descs = DescriptorCache::new(&programs);
        Self {
            inner: Arc::new(Inner {
                programs,
                attachments,
                decoder: Box::new(decoder),
                descs,
                metrics,
            }),
        }
    }

    pub fn programs(&self) -> &[Program] {
        &self.inner.programs
    }

    pub fn attachments(&self) -> &Attachments {
        &self.inner.attachments
    }

    /// Descriptors of every configured metric, created on first call.
    /// Metrics whose descriptor cannot be built are logged and left out.
    pub fn describe(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        for program in &self.inner.programs {
            for counter in &program.metrics.counters {
                descs.extend(self.descriptor(program, &counter.name, &counter.help, &counter.labels));
            }
            for histogram in &program.metrics.histograms {
                descs.extend(self.descriptor(
                    program,
                    &histogram.name,
                    &histogram.help,
                    histogram.group_labels(),
                ));
            }
        }
        descs
    }

    fn descriptor(&self, program: &Program, metric: &str, help: &str, labels: &[Label]) -> Option<&Desc> {
        let names: Vec<String> = labels.iter().map(|l| l.name.clone()).collect();
        match self
            .inner
            .descs
            .get_or_create(&program.name, metric, help, &names)
        {
            Ok(desc) => Some(desc),
            Err(e) => {
                error!(
                    "Error creating descriptor for metric {:?} of program {:?}: {}",
                    metric, program.name, e
                );
                None
            }
        }
    }

    fn table_values(
        &self,
        program: &Program,
        table: &str,
        labels: &[Label],
    ) -> Result<Vec<MetricValue>, ExportError> {
        let module = self
            .inner
            .attachments
            .module(&program.name)
            .ok_or_else(|| ExportError::NotAttached(program.name.clone()))?;

        read_table(module, table, labels, self.inner.decoder.as_ref()).map_err(|source| {
            ExportError::Table {
                program: program.name.clone(),
                table: table.to_string(),
                source,
            }
        })
    }

    fn record_read_error(&self, program: &Program, table: &str) {
        self.inner
            .metrics
            .table_read_errors_total
            .with_label_values(&[program.name.as_str(), table])
            .inc();
    }

    /// One counter family per configured counter.
    pub fn collect_counters(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();

        for program in &self.inner.programs {
            for counter in &program.metrics.counters {
                let Some(desc) = self.descriptor(program, &counter.name, &counter.help, &counter.labels)
                else {
                    continue;
                };

                let rows = match self.table_values(program, &counter.table, &counter.labels) {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(
                            "Error getting table {:?} values for metric {:?} of program {:?}: {}",
                            counter.table, counter.name, program.name, e
                        );
                        self.record_read_error(program, &counter.table);
                        continue;
                    }
                };

                let metrics = rows
                    .iter()
                    .map(|row| {
                        let mut value = proto::Counter::default();
                        value.set_value(row.value);

                        let mut metric = proto::Metric::default();
                        metric.label = label_pairs(desc, &row.labels);
                        metric.counter = Some(value).into();
                        metric
                    })
                    .collect();

                families.extend(family(desc, MetricType::COUNTER, metrics));
            }
        }

        families
    }

    /// One histogram family per configured histogram, one sample per group.
    pub fn collect_histograms(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();

        for program in &self.inner.programs {
            for histogram in &program.metrics.histograms {
                let Some(desc) = self.descriptor(
                    program,
                    &histogram.name,
                    &histogram.help,
                    histogram.group_labels(),
                ) else {
                    continue;
                };

                let rows = match self.table_values(program, &histogram.table, histogram.table_labels()) {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(
                            "Error getting table {:?} values for metric {:?} of program {:?}: {}",
                            histogram.table, histogram.name, program.name, e
                        );
                        self.record_read_error(program, &histogram.table);
                        continue;
                    }
                };

                let groups = match group_rows(&rows) {
                    Ok(groups) => groups,
                    Err(e) => {
                        error!(
                            "Error parsing bucket label {:?} in table {:?} for metric {:?} of program {:?}: {}",
                            histogram.bucket_label().name,
                            histogram.table,
                            histogram.name,
                            program.name,
                            e
                        );
                        self.record_read_error(program, &histogram.table);
                        continue;
                    }
                };

                let mut metrics = Vec::with_capacity(groups.len());
                for group in groups {
                    let cumulative = match cumulative(&group.buckets) {
                        Ok(h) => h,
                        Err(e) => {
                            error!(
                                "Error transforming histogram for metric {:?} in program {:?}: {}",
                                histogram.name, program.name, e
                            );
                            continue;
                        }
                    };

                    let mut value = proto::Histogram::default();
                    value.set_sample_count(cumulative.count);
                    value.set_sample_sum(cumulative.sum);
                    value.bucket = cumulative
                        .buckets
                        .iter()
                        .map(|&(upper_bound, count)| {
                            let mut bucket = proto::Bucket::default();
                            bucket.set_upper_bound(upper_bound as f64);
                            bucket.set_cumulative_count(count);
                            bucket
                        })
                        .collect();

                    let mut metric = proto::Metric::default();
                    metric.label = label_pairs(desc, &group.labels);
                    metric.histogram = Some(value).into();
                    metrics.push(metric);
                }

                families.extend(family(desc, MetricType::HISTOGRAM, metrics));
            }
        }

        families
    }

    /// Decoded contents of every table referenced by each program's metrics.
    ///
    /// Tables keep first-reference order; when a table backs several metrics
    /// the labels of the last one are used. Any failure aborts the dump.
    pub fn dump_tables(&self) -> Result<Vec<ProgramTables>, ExportError> {
        let mut dump = Vec::with_capacity(self.inner.programs.len());

        for program in &self.inner.programs {
            if self.inner.attachments.module(&program.name).is_none() {
                return Err(ExportError::NotAttached(program.name.clone()));
            }

            let mut tables: Vec<(&str, &[Label])> = Vec::new();
            let references = program
                .metrics
                .counters
                .iter()
                .map(|c| (c.table.as_str(), c.labels.as_slice()))
                .chain(
                    program
                        .metrics
                        .histograms
                        .iter()
                        .map(|h| (h.table.as_str(), h.table_labels())),
                );
            for (table, labels) in references {
                if table.is_empty() {
                    continue;
                }
                match tables.iter_mut().find(|(name, _)| *name == table) {
                    Some(entry) => entry.1 = labels,
                    None => tables.push((table, labels)),
                }
            }

            let mut program_tables = ProgramTables {
                program: program.name.clone(),
                tables: Vec::with_capacity(tables.len()),
            };
            for (table, labels) in tables {
                program_tables.tables.push(TableDump {
                    name: table.to_string(),
                    values: self.table_values(program, table, labels)?,
                });
            }
            dump.push(program_tables);
        }

        Ok(dump)
    }
}

impl Collector for Exporter {
    fn desc(&self) -> Vec<&Desc> {
        self.describe()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let start = Instant::now();

        let mut families = self.collect_counters();
        families.extend(self.collect_histograms());

        let elapsed = start.elapsed();
        self.inner
            .metrics
            .scrape_duration_seconds
            .set(elapsed.as_secs_f64());
        debug!(
            "Collected {} metric families in {:?}",
            families.len(),
            elapsed
        );

        families
    }
}

fn label_pairs(desc: &Desc, values: &[String]) -> Vec<LabelPair> {
    let mut pairs: Vec<LabelPair> = desc
        .variable_labels
        .iter()
        .zip(values)
        .map(|(name, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            pair
        })
        .collect();
    pairs.sort_by(|a, b| a.name().cmp(b.name()));
    pairs
}

fn family(desc: &Desc, kind: MetricType, metrics: Vec<proto::Metric>) -> Option<MetricFamily> {
    if metrics.is_empty() {
        return None;
    }
    let mut family = MetricFamily::default();
    family.set_name(desc.fq_name.clone());
    family.set_help(desc.help.clone());
    family.set_field_type(kind);
    family.metric = metrics;
    Some(family)
}
