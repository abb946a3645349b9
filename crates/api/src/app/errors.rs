use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mrp_infra::outbox::OutboxError;

pub fn outbox_error_to_response(err: OutboxError) -> axum::response::Response {
    match err {
        OutboxError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("no outbox event {id}"))
        }
        err @ OutboxError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", err.to_string())
        }
        err @ OutboxError::DuplicateEvent(_) => {
            json_error(StatusCode::CONFLICT, "duplicate_event", err.to_string())
        }
        err => {
            tracing::error!(error = %err, "outbox store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
