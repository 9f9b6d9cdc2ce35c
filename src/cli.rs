//! CLI arguments for ebpf-exporter.
//!
//! This module defines the command-line interface structure using the clap library.

use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug, Default)]
#[command(
    name = "ebpf-exporter",
    about = "Prometheus exporter for custom eBPF kernel tables",
    long_about = "Prometheus exporter for custom eBPF kernel tables.\n\n\
                  Loads the configured BPF objects, attaches their kprobes and kretprobes, \
                  and exports the BPF maps they populate as Prometheus counters and histograms.",
    version,
    propagate_version = true
)]
pub struct Args {
    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Enable TLS/SSL for HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// Path to TLS certificate (PEM)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key (PEM)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl Default for ConfigFormat {
    fn default() -> Self {
        ConfigFormat::Yaml
    }
}
