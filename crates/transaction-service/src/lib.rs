//! Transaction service: owner-scoped transaction records whose every write
//! is gated on a remote audit acknowledgement.
//!
//! The write path runs as a choreographed saga (see [`saga`]); the read path
//! is a plain filtered query surface. Authentication is bearer-token JWT.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod routes;
pub mod saga;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::FromRef;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use messaging::{InMemoryMessageBus, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::JwtKeys;
use config::DeploymentEnv;
use saga::{AckRegistry, TransactionSaga};
use store::{InMemoryTransactionStore, InMemoryUserStore, TransactionStore, UserStore};

/// Shared application state accessible from all handlers.
pub struct AppState<S, U, B>
where
    S: TransactionStore,
    U: UserStore,
    B: MessageBus,
{
    pub saga: TransactionSaga<S, B>,
    pub store: S,
    pub users: U,
    pub jwt: JwtKeys,
    pub registry: AckRegistry,
}

impl<S, U, B> FromRef<Arc<AppState<S, U, B>>> for JwtKeys
where
    S: TransactionStore,
    U: UserStore,
    B: MessageBus,
{
    fn from_ref(state: &Arc<AppState<S, U, B>>) -> Self {
        state.jwt.clone()
    }
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
pub fn create_app<S, U, B>(
    state: Arc<AppState<S, U, B>>,
    metrics_handle: PrometheusHandle,
    cors: CorsLayer,
) -> Router
where
    S: TransactionStore + 'static,
    U: UserStore + 'static,
    B: MessageBus + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/api/auth/register", post(routes::auth::register::<S, U, B>))
        .route("/api/auth/login", post(routes::auth::login::<S, U, B>))
        .route("/api/auth/me", get(routes::auth::me::<S, U, B>))
        .route(
            "/api/transactions",
            post(routes::transactions::create::<S, U, B>)
                .get(routes::transactions::list::<S, U, B>),
        )
        .route(
            "/api/transactions/{id}",
            get(routes::transactions::get::<S, U, B>)
                .put(routes::transactions::update::<S, U, B>)
                .delete(routes::transactions::delete::<S, U, B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Wires an in-memory state for tests: memory stores, the given bus, and a
/// started ack registry.
pub async fn create_in_memory_state(
    jwt: JwtKeys,
    ack_timeout: Duration,
    bus: Arc<InMemoryMessageBus>,
) -> Arc<AppState<InMemoryTransactionStore, InMemoryUserStore, InMemoryMessageBus>> {
    let store = InMemoryTransactionStore::new();
    let users = InMemoryUserStore::new();
    let registry = AckRegistry::new();
    registry
        .start(bus.clone())
        .await
        .expect("in-memory subscribe cannot fail");

    let saga = TransactionSaga::new(
        store.clone(),
        bus.clone(),
        registry.clone(),
        "transaction-service",
        ack_timeout,
    );

    Arc::new(AppState {
        saga,
        store,
        users,
        jwt,
        registry,
    })
}
