//! Audit service: the immutable audit trail for the transaction platform.
//!
//! The write side is the bus consumer in [`consumer`]: rows are created in
//! response to saga requests and only ever mutated by compensation. The HTTP
//! surface is the query side plus one internal direct-write endpoint.

pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod routes;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use messaging::{InMemoryMessageBus, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::DeploymentEnv;
use consumer::AuditConsumer;
use store::{AuditStore, InMemoryAuditStore};

/// Shared application state accessible from all handlers.
pub struct AppState<S, B>
where
    S: AuditStore,
    B: MessageBus,
{
    pub store: S,
    pub bus: Arc<B>,
}

/// Builds the CORS layer: restricted to the configured origins in
/// production, permissive otherwise.
pub fn cors_layer(allowed_origins: &[String], env: DeploymentEnv) -> CorsLayer {
    match env {
        DeploymentEnv::Production => {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "skipping unparsable allowed origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        DeploymentEnv::Development => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, B>(
    state: Arc<AppState<S, B>>,
    metrics_handle: PrometheusHandle,
    cors: CorsLayer,
) -> Router
where
    S: AuditStore + 'static,
    B: MessageBus + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/api/audit-logs",
            axum::routing::post(routes::audit_logs::create::<S, B>)
                .get(routes::audit_logs::list::<S, B>),
        )
        .route("/api/audit-logs/{id}", get(routes::audit_logs::get::<S, B>))
        .route(
            "/api/audit-logs/correlation/{correlation_id}",
            get(routes::audit_logs::by_correlation::<S, B>),
        )
        .route(
            "/api/audit-logs/entity/{entity_type}/{entity_id}",
            get(routes::audit_logs::by_entity::<S, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Wires an in-memory state for tests: memory store, memory bus, and a
/// started consumer.
pub async fn create_in_memory_state(
    bus: Arc<InMemoryMessageBus>,
) -> Arc<AppState<InMemoryAuditStore, InMemoryMessageBus>> {
    let store = InMemoryAuditStore::new();
    let consumer = AuditConsumer::new(store.clone(), bus.clone());
    consumer
        .start()
        .await
        .expect("in-memory subscribe cannot fail");

    Arc::new(AppState { store, bus })
}
