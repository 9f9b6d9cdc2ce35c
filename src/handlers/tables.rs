//! Debug endpoint printing the decoded contents of every kernel table.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, error, instrument};

use ebpf_exporter::dump;

use crate::state::SharedState;

/// Handler for the /tables endpoint.
#[instrument(skip(state))]
pub async fn tables_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /tables request");

    let exporter = state.exporter.clone();
    let result = tokio::task::spawn_blocking(move || exporter.dump_tables()).await;

    let (status, body) = match result {
        Ok(Ok(tables)) => (StatusCode::OK, dump::render(&tables)),
        Ok(Err(e)) => {
            error!("Error dumping tables: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {}\n", e))
        }
        Err(e) => {
            error!("Table dump task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {}\n", e))
        }
    };

    (status, [("Content-Type", "text/plain; charset=utf-8")], body)
}
