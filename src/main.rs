//! ebpf-exporter
//!
//! Loads the configured BPF programs, attaches their probes and serves the
//! kernel tables they fill as Prometheus metrics.

mod handlers;
mod startup_checks;
mod state;

use anyhow::{anyhow, Context, Result};
use axum::{routing::get, Router};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::{net::TcpListener, signal};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use ebpf_exporter::attach::{Attachments, ProbeKind};
use ebpf_exporter::cli::{Args, LogLevel};
use ebpf_exporter::config::{
    render_config, resolve_config, validate_effective_config, Config, DEFAULT_BIND_ADDR,
    DEFAULT_PORT,
};
use ebpf_exporter::decoder::DecoderSet;
use ebpf_exporter::kernel::Attacher;
use ebpf_exporter::metrics::ExporterMetrics;
use ebpf_exporter::Exporter;

use handlers::{health_handler, metrics_handler, root_handler, tables_handler};
use state::AppState;

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) -> Result<()> {
    let log_level = match args.log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging initialized with level: {:?}", args.log_level);
    Ok(())
}

#[cfg(feature = "ebpf")]
fn kernel_attacher() -> Result<Box<dyn Attacher>> {
    Ok(Box::new(ebpf_exporter::kernel::libbpf::LibbpfAttacher::new()))
}

#[cfg(not(feature = "ebpf"))]
fn kernel_attacher() -> Result<Box<dyn Attacher>> {
    Err(anyhow!(
        "ebpf-exporter was built without the `ebpf` feature and cannot load programs"
    ))
}

/// Loads and attaches every program. Any failure ends the process: a
/// half-attached exporter is never served.
fn attach_programs(config: &Config) -> Attachments {
    let mut attachments = Attachments::new();
    if config.programs.is_empty() {
        warn!("⚠️  No programs configured - only self-metrics will be exported");
        return attachments;
    }

    let attacher = match kernel_attacher() {
        Ok(attacher) => attacher,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = attachments.attach_all(attacher.as_ref(), &config.programs) {
        error!("❌ Error attaching programs: {}", e);
        std::process::exit(1);
    }
    attachments
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {:#}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        print!("{}", render_config(&config, args.config_format)?);
        return Ok(());
    }

    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {:#}", e);
        std::process::exit(1);
    }

    setup_logging(&args)?;

    info!("Starting ebpf-exporter");

    if let Err(e) = startup_checks::validate_requirements(&config) {
        error!("❌ Startup validation failed: {}", e);
        error!("   Attaching programs will most likely fail");
    }

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    let attachments = attach_programs(&config);

    let registry = Registry::new();
    let metrics = ExporterMetrics::new(&registry)?;

    for program in &config.programs {
        for kind in [ProbeKind::Kprobe, ProbeKind::Kretprobe] {
            metrics
                .attached_probes
                .with_label_values(&[program.name.as_str(), kind.as_str()])
                .set(attachments.probe_count(&program.name, kind) as i64);
        }
    }

    let exporter = Exporter::new(config.programs.clone(), attachments, DecoderSet::new(), metrics);
    if !exporter.attachments().is_empty() {
        registry
            .register(Box::new(exporter.clone()))
            .context("Failed to register table collector")?;
    }
    debug!("All metrics registered successfully");

    let state = Arc::new(AppState {
        registry,
        exporter,
        config: Arc::new(config.clone()),
        start_time: Instant::now(),
    });

    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", bind_ip_str, port))?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/tables", get(tables_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    if state.config.enable_tls.unwrap_or(false) {
        // Both paths are checked by validate_effective_config().
        let cert_path = config
            .tls_cert_path
            .as_deref()
            .ok_or_else(|| anyhow!("tls_cert_path is not set"))?;
        let key_path = config
            .tls_key_path
            .as_deref()
            .ok_or_else(|| anyhow!("tls_key_path is not set"))?;

        info!("Loading TLS certificate from: {}", cert_path);
        info!("Loading TLS private key from: {}", key_path);

        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("Failed to load TLS configuration")?;

        info!("ebpf-exporter listening on https://{}:{}", bind_ip_str, port);

        let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                    return Err(e.into());
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting...");
            }
        }
    } else {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("ebpf-exporter listening on http://{}:{}", bind_ip_str, port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;
    }

    info!("ebpf-exporter stopped gracefully");
    Ok(())
}
