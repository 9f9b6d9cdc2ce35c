//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use ebpf_exporter::attach::ProbeKind;

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Handler for the /health endpoint.
///
/// Programs are attached before the server starts, so a running server is
/// always healthy; the body lists what is attached.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let uptime_hours = state.start_time.elapsed().as_secs_f64() / SECONDS_PER_HOUR;
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };

    let attachments = state.exporter.attachments();
    let mut table = String::new();
    writeln!(table, "{:<24} {:>8} {:>10}", "PROGRAM", "KPROBES", "KRETPROBES").ok();
    for program in state.exporter.programs() {
        writeln!(
            table,
            "{:<24} {:>8} {:>10}",
            program.name,
            attachments.probe_count(&program.name, ProbeKind::Kprobe),
            attachments.probe_count(&program.name, ProbeKind::Kretprobe)
        )
        .ok();
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "OK\n\nUptime: {uptime_str}\nAttached programs: {}\n\n{table}",
            attachments.len()
        ),
    )
}
