//! HTTP application wiring.
//!
//! - `services.rs`: infrastructure wiring (pool, migrations, publisher, consumers)
//! - `routes/`: admin handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use mrp_infra::outbox::OutboxStore;

pub mod errors;
pub mod routes;
pub mod services;

/// Build the admin router over any outbox store.
pub fn build_app<S: OutboxStore + 'static>(store: Arc<S>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health::<S>))
        .merge(routes::outbox::router::<S>())
        .layer(ServiceBuilder::new().layer(Extension(store)))
}
