//! Configuration management for ebpf-exporter.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.
//!
//! The program/metric/label definitions loaded here are read-only for the rest
//! of the crate: they are created once at startup and never mutated.

use crate::cli::{Args, ConfigFormat};
use crate::decoder::KNOWN_DECODERS;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9435;

/// Top-level configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // TLS/SSL Configuration
    #[serde(alias = "enable-tls")]
    pub enable_tls: Option<bool>,
    #[serde(alias = "tls-cert-path")]
    pub tls_cert_path: Option<String>,
    #[serde(alias = "tls-key-path")]
    pub tls_key_path: Option<String>,

    /// Instrumentation programs to attach and export.
    #[serde(default)]
    pub programs: Vec<Program>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            enable_tls: Some(false),
            tls_cert_path: None,
            tls_key_path: None,
            programs: Vec::new(),
        }
    }
}

/// A named unit of kernel instrumentation: one BPF object, its probes and
/// the metrics read from its maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    /// Compiled BPF object file.
    pub object: PathBuf,
    /// Kernel symbol -> probe function, attached in listed order.
    #[serde(default, with = "probe_map", skip_serializing_if = "Vec::is_empty")]
    pub kprobes: Vec<ProbeDirective>,
    /// Kernel symbol -> probe function, attached in listed order.
    #[serde(default, with = "probe_map", skip_serializing_if = "Vec::is_empty")]
    pub kretprobes: Vec<ProbeDirective>,
    #[serde(default)]
    pub metrics: Metrics,
}

/// Attach `probe` (a function in the BPF object) to kernel `symbol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeDirective {
    pub symbol: String,
    pub probe: String,
}

impl ProbeDirective {
    pub fn new(symbol: impl Into<String>, probe: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            probe: probe.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub counters: Vec<CounterMetric>,
    #[serde(default)]
    pub histograms: Vec<HistogramMetric>,
}

/// Counter read from a table: every label is exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterMetric {
    pub name: String,
    pub help: String,
    pub table: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Histogram read from a table.
///
/// The last configured label is the bucket boundary and is not exported;
/// every label before it identifies a histogram series. The split is checked
/// when the configuration is deserialized, so a histogram always has a
/// bucket label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "HistogramShape", into = "HistogramShape")]
pub struct HistogramMetric {
    pub name: String,
    pub help: String,
    pub table: String,
    labels: Vec<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistogramShape {
    name: String,
    help: String,
    table: String,
    #[serde(default)]
    labels: Vec<Label>,
}

impl TryFrom<HistogramShape> for HistogramMetric {
    type Error = String;

    fn try_from(shape: HistogramShape) -> Result<Self, Self::Error> {
        HistogramMetric::new(shape.name, shape.help, shape.table, shape.labels)
    }
}

impl From<HistogramMetric> for HistogramShape {
    fn from(h: HistogramMetric) -> Self {
        Self {
            name: h.name,
            help: h.help,
            table: h.table,
            labels: h.labels,
        }
    }
}

impl HistogramMetric {
    /// Builds a histogram metric; `labels` must end with the bucket label.
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        table: impl Into<String>,
        labels: Vec<Label>,
    ) -> Result<Self, String> {
        let name = name.into();
        if labels.is_empty() {
            return Err(format!(
                "histogram {:?} needs at least one label for the bucket boundary",
                name
            ));
        }
        Ok(Self {
            name,
            help: help.into(),
            table: table.into(),
            labels,
        })
    }

    /// Labels identifying one histogram series (all but the bucket label).
    pub fn group_labels(&self) -> &[Label] {
        &self.labels[..self.labels.len() - 1]
    }

    /// The label holding the bucket boundary.
    pub fn bucket_label(&self) -> &Label {
        &self.labels[self.labels.len() - 1]
    }

    /// Full key layout, group labels followed by the bucket label.
    pub fn table_labels(&self) -> &[Label] {
        &self.labels
    }
}

/// One positional field of a compound table key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    /// Field width in bytes, used to render binary map keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Decoders applied in order, each one feeding the next.
    #[serde(default)]
    pub decoders: Vec<DecoderConfig>,
}

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderConfig) -> Self {
        self.decoders.push(decoder);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub name: String,
    /// Patterns for the `regexp` decoder.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regexps: Vec<String>,
    /// Lookup table for the `static_map` decoder.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_map: BTreeMap<String, String>,
}

impl DecoderConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// (De)serializes probe directives as a map while keeping file order.
mod probe_map {
    use super::ProbeDirective;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        directives: &[ProbeDirective],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(directives.len()))?;
        for d in directives {
            map.serialize_entry(&d.symbol, &d.probe)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ProbeDirective>, D::Error> {
        struct DirectiveVisitor;

        impl<'de> Visitor<'de> for DirectiveVisitor {
            type Value = Vec<ProbeDirective>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of kernel symbol to probe function")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((symbol, probe)) = access.next_entry::<String, String>()? {
                    out.push(ProbeDirective { symbol, probe });
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(DirectiveVisitor)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    for program in &cfg.programs {
        if program.name.is_empty() {
            bail!("Program with object {} has no name", program.object.display());
        }

        let labels = program
            .metrics
            .counters
            .iter()
            .flat_map(|c| c.labels.iter().map(move |l| (c.name.as_str(), l)))
            .chain(program.metrics.histograms.iter().flat_map(|h| {
                h.table_labels().iter().map(move |l| (h.name.as_str(), l))
            }));

        for (metric, label) in labels {
            for decoder in &label.decoders {
                if !KNOWN_DECODERS.contains(&decoder.name.as_str()) {
                    bail!(
                        "Unknown decoder '{}' for label '{}' of metric '{}' in program '{}'",
                        decoder.name,
                        label.name,
                        metric,
                        program.name
                    );
                }
                for pattern in &decoder.regexps {
                    Regex::new(pattern).with_context(|| {
                        format!(
                            "Invalid regexp '{}' for label '{}' of metric '{}' in program '{}'",
                            pattern, label.name, metric, program.name
                        )
                    })?;
                }
            }
        }
    }

    // TLS validation
    if cfg.enable_tls.unwrap_or(false) {
        match (cfg.tls_cert_path.as_deref(), cfg.tls_key_path.as_deref()) {
            (None, None) => {
                bail!("TLS is enabled but neither tls_cert_path nor tls_key_path are set");
            }
            (Some(_), None) => bail!("TLS is enabled but tls_key_path is not set"),
            (None, Some(_)) => bail!("TLS is enabled but tls_cert_path is not set"),
            (Some(cert), Some(key)) => {
                check_pem_file(cert, "certificate")?;
                check_pem_file(key, "private key")?;
            }
        }
    }

    Ok(())
}

fn check_pem_file(path: &str, what: &str) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => anyhow!("TLS {} file not found: {}", what, path),
        _ => anyhow!("TLS {} file is not readable: {} ({})", what, path, e),
    })?;
    if meta.len() == 0 {
        bail!("TLS {} file is empty: {}", what, path);
    }
    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }

    // Only override port if the user supplied it on the CLI.
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    // TLS configuration: CLI wins if provided
    if args.enable_tls {
        config.enable_tls = Some(true);
    }
    if let Some(cert_path) = &args.tls_cert {
        config.tls_cert_path = Some(cert_path.to_string_lossy().to_string());
    }
    if let Some(key_path) = &args.tls_key {
        config.tls_key_path = Some(key_path.to_string_lossy().to_string());
    }

    Ok(config)
}

/// Loads the configuration file, trying default locations when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                bail!("Config file not found: {}", p.display());
            }
            p.to_path_buf()
        }
        None => {
            let defaults = [
                "/etc/ebpf-exporter/config.yaml",
                "/etc/ebpf-exporter/config.yml",
                "./ebpf-exporter.yaml",
                "./ebpf-exporter.yml",
            ];

            match defaults.iter().find(|p| Path::new(p).exists()) {
                Some(p) => PathBuf::from(p),
                None => return Ok(Config::default()),
            }
        }
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses configuration text; the extension selects the format (YAML by default).
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config> {
    let config = match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders configuration in the requested format
pub fn render_config(config: &Config, format: ConfigFormat) -> Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIO_YAML: &str = r#"
port: 9500
programs:
  - name: bio
    object: /tmp/bio.bpf.o
    kprobes:
      blk_start_request: trace_req_start
      blk_mq_start_request: trace_req_start
      blk_account_io_done: trace_req_completion
    kretprobes:
      submit_bio: trace_submit_return
    metrics:
      counters:
        - name: bio_requests_total
          help: Block IO requests
          table: counts
          labels:
            - name: device
              size: 4
              decoders:
                - name: majorminor
            - name: op
              size: 1
              decoders:
                - name: uint
                - name: static_map
                  static_map:
                    1: read
                    2: write
      histograms:
        - name: bio_latency_seconds
          help: Block IO latency histogram
          table: io_latency
          labels:
            - name: device
              size: 4
            - name: bucket
              size: 8
              decoders:
                - name: uint
"#;

    #[test]
    fn test_yaml_program_parsing() {
        let cfg = parse_config(BIO_YAML, Some("yaml")).unwrap();
        assert_eq!(cfg.port, Some(9500));
        assert_eq!(cfg.programs.len(), 1);

        let program = &cfg.programs[0];
        assert_eq!(program.name, "bio");
        assert_eq!(program.object, PathBuf::from("/tmp/bio.bpf.o"));

        let counter = &program.metrics.counters[0];
        assert_eq!(counter.labels.len(), 2);
        assert_eq!(counter.labels[1].decoders.len(), 2);
        assert_eq!(
            counter.labels[1].decoders[1].static_map.get("2").map(String::as_str),
            Some("write")
        );
    }

    #[test]
    fn test_probe_order_is_preserved() {
        let cfg = parse_config(BIO_YAML, None).unwrap();
        let program = &cfg.programs[0];

        let symbols: Vec<_> = program.kprobes.iter().map(|d| d.symbol.as_str()).collect();
        assert_eq!(
            symbols,
            vec!["blk_start_request", "blk_mq_start_request", "blk_account_io_done"]
        );
        assert_eq!(
            program.kretprobes,
            vec![ProbeDirective::new("submit_bio", "trace_submit_return")]
        );
    }

    #[test]
    fn test_histogram_label_partition() {
        let cfg = parse_config(BIO_YAML, None).unwrap();
        let histogram = &cfg.programs[0].metrics.histograms[0];

        let group: Vec<_> = histogram.group_labels().iter().map(|l| &l.name).collect();
        assert_eq!(group, vec!["device"]);
        assert_eq!(histogram.bucket_label().name, "bucket");
        assert_eq!(histogram.table_labels().len(), 2);
    }

    #[test]
    fn test_histogram_without_labels_is_rejected() {
        let yaml = r#"
programs:
  - name: broken
    object: /tmp/x.o
    metrics:
      histograms:
        - name: latency
          help: no labels
          table: t
"#;
        let err = parse_config(yaml, None).unwrap_err();
        assert!(format!("{:#}", err).contains("bucket boundary"));
    }

    #[test]
    fn test_json_program_parsing() {
        let json = r#"{
            "programs": [{
                "name": "timers",
                "object": "/tmp/timers.o",
                "kprobes": {"b_sym": "probe_b", "a_sym": "probe_a"},
                "metrics": {"counters": [{
                    "name": "timer_start_total",
                    "help": "Timers started",
                    "table": "counts",
                    "labels": [{"name": "function", "decoders": [{"name": "ksym"}]}]
                }]}
            }]
        }"#;
        let cfg = parse_config(json, Some("json")).unwrap();
        let program = &cfg.programs[0];
        assert_eq!(program.kprobes[0], ProbeDirective::new("b_sym", "probe_b"));
        assert_eq!(program.kprobes[1], ProbeDirective::new("a_sym", "probe_a"));
        assert!(program.metrics.histograms.is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_decoder() {
        let mut cfg = parse_config(BIO_YAML, None).unwrap();
        assert!(validate_effective_config(&cfg).is_ok());

        cfg.programs[0].metrics.counters[0].labels[0]
            .decoders
            .push(DecoderConfig::named("nope"));
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("Unknown decoder 'nope'"));
    }

    #[test]
    fn test_validate_rejects_bad_regexp() {
        let mut cfg = parse_config(BIO_YAML, None).unwrap();
        let mut decoder = DecoderConfig::named("regexp");
        decoder.regexps.push("(unclosed".to_string());
        cfg.programs[0].metrics.counters[0].labels[0]
            .decoders
            .push(decoder);

        assert!(validate_effective_config(&cfg).is_err());
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let cfg = Config {
            enable_tls: Some(true),
            tls_cert_path: Some("/some/cert.pem".into()),
            ..Config::default()
        };
        let err = validate_effective_config(&cfg).unwrap_err();
        assert_eq!(err.to_string(), "TLS is enabled but tls_key_path is not set");
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = Args {
            no_config: true,
            port: Some(1234),
            bind: Some("127.0.0.1".parse().unwrap()),
            ..Args::default()
        };
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port, Some(1234));
        assert_eq!(cfg.bind.as_deref(), Some("127.0.0.1"));
        assert!(cfg.programs.is_empty());
    }

    #[test]
    fn test_shipped_example_is_valid() {
        let cfg = parse_config(include_str!("../demos/ebpf-exporter.yaml"), None).unwrap();
        validate_effective_config(&cfg).unwrap();

        let names: Vec<_> = cfg.programs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bio", "timers"]);
    }

    #[test]
    fn test_render_yaml_keeps_probe_map_shape() {
        let cfg = parse_config(BIO_YAML, None).unwrap();
        let rendered = render_config(&cfg, ConfigFormat::Yaml).unwrap();
        assert!(rendered.contains("blk_start_request: trace_req_start"));

        let reparsed = parse_config(&rendered, None).unwrap();
        assert_eq!(reparsed.programs[0].kprobes, cfg.programs[0].kprobes);
    }
}
