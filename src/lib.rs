//! eBPF Exporter Library
//!
//! Turns kernel tables (BPF maps) populated by attached kprobes into labeled
//! Prometheus counters and histograms.
//!
//! # Overview
//!
//! - [`attach::Attachments`] loads every configured program and attaches its
//!   kprobes/kretprobes, keeping the resulting modules for the process lifetime.
//! - [`table::read_table`] enumerates a table and decodes compound keys into
//!   label tuples through a [`decoder::LabelDecoder`].
//! - [`histogram`] groups decoded rows and converts per-bucket kernel counts
//!   into cumulative buckets.
//! - [`exporter::Exporter`] implements [`prometheus::core::Collector`] on top
//!   of the above, backed by a stable [`descriptors::DescriptorCache`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use ebpf_exporter::attach::Attachments;
//! use ebpf_exporter::decoder::DecoderSet;
//! use ebpf_exporter::exporter::Exporter;
//! use ebpf_exporter::metrics::ExporterMetrics;
//! use prometheus::Registry;
//!
//! # fn run(config: ebpf_exporter::config::Config, attacher: &dyn ebpf_exporter::kernel::Attacher) -> anyhow::Result<()> {
//! let mut attachments = Attachments::new();
//! attachments.attach_all(attacher, &config.programs)?;
//!
//! let registry = Registry::new();
//! let metrics = ExporterMetrics::new(&registry)?;
//! let exporter = Exporter::new(config.programs, attachments, DecoderSet::new(), metrics);
//! registry.register(Box::new(exporter.clone()))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `ebpf` (default): enables the libbpf-backed kernel attacher in
//!   [`kernel::libbpf`].

pub mod attach;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod descriptors;
pub mod dump;
pub mod exporter;
pub mod histogram;
pub mod kernel;
pub mod metrics;
pub mod table;

// Re-export main types for convenience
pub use attach::{AttachError, Attachments};
pub use config::{Config, Label, Program};
pub use decoder::{Decoded, DecoderSet, LabelDecoder};
pub use exporter::Exporter;
