//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use std::fmt::Write;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.start_time.elapsed().as_secs();
    let uptime_str = format!(
        "{}h {}m {}s",
        uptime_secs / 3600,
        (uptime_secs % 3600) / 60,
        uptime_secs % 60
    );

    let mut programs = String::new();
    for program in state.exporter.programs() {
        let metrics = program
            .metrics
            .counters
            .iter()
            .map(|c| c.name.as_str())
            .chain(program.metrics.histograms.iter().map(|h| h.name.as_str()))
            .map(escape)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            programs,
            "        <li><code>{}</code>: {}</li>",
            escape(&program.name),
            metrics
        );
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>eBPF Exporter</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
        .container {{ max-width: 900px; margin: 0 auto; background: white; padding: 40px; border-radius: 8px; }}
        h1 {{ color: #333; border-bottom: 3px solid #007bff; padding-bottom: 15px; }}
        li {{ margin: 8px 0; }}
        code {{ background: #e9ecef; padding: 2px 6px; border-radius: 3px; }}
    </style>
</head>
<body>
<div class="container">
    <h1>eBPF Exporter</h1>
    <p>Version {version}, up {uptime}</p>

    <h2>Endpoints</h2>
    <ul>
        <li><a href="/metrics">/metrics</a>: Prometheus metrics</li>
        <li><a href="/tables">/tables</a>: decoded kernel tables (debug)</li>
        <li><a href="/health">/health</a>: attached programs and uptime</li>
    </ul>

    <h2>Programs</h2>
    <ul>
{programs}    </ul>
</div>
</body>
</html>"#,
        version = version,
        uptime = uptime_str,
        programs = programs
    );

    Html(html)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
