//! Dead-letter inspection and manual replay.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use mrp_core::EventId;
use mrp_infra::outbox::{OutboxStatus, OutboxStore};

use crate::app::errors;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub fn router<S: OutboxStore + 'static>() -> Router {
    Router::new()
        .route("/outbox", get(list::<S>))
        .route("/outbox/:event_id/requeue", post(requeue::<S>))
}

/// GET /outbox?status=DEAD&limit=50 - rows in one status, oldest first.
pub async fn list<S: OutboxStore + 'static>(
    Extension(store): Extension<Arc<S>>,
    Query(params): Query<ListParams>,
) -> axum::response::Response {
    let status = match params.status.as_deref() {
        None => OutboxStatus::Dead,
        Some(raw) => match raw.to_ascii_uppercase().parse::<OutboxStatus>() {
            Ok(status) => status,
            Err(msg) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_status", msg),
        },
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match store.find_by_status(status, limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => errors::outbox_error_to_response(err),
    }
}

/// POST /outbox/:event_id/requeue - move a DEAD row back to READY.
pub async fn requeue<S: OutboxStore + 'static>(
    Extension(store): Extension<Arc<S>>,
    Path(event_id): Path<String>,
) -> axum::response::Response {
    let event_id: EventId = match event_id.parse() {
        Ok(id) => id,
        Err(err) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_event_id",
                format!("{err}"),
            );
        }
    };

    match store.requeue_dead(event_id).await {
        Ok(row) => {
            tracing::info!(event_id = %event_id, "dead outbox row requeued");
            Json(row).into_response()
        }
        Err(err) => errors::outbox_error_to_response(err),
    }
}
