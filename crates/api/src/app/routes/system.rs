use std::sync::Arc;

use axum::{Extension, Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use mrp_infra::outbox::OutboxStore;

use crate::app::errors;

/// GET /health - liveness plus outbox status counts.
pub async fn health<S: OutboxStore + 'static>(
    Extension(store): Extension<Arc<S>>,
) -> axum::response::Response {
    match store.status_counts().await {
        Ok(counts) => Json(json!({
            "status": "ok",
            "outbox": counts,
            "pending": counts.pending(),
        }))
        .into_response(),
        Err(err) => errors::json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            err.to_string(),
        ),
    }
}
