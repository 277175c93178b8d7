//! Transaction service entry point.

use std::sync::Arc;

use messaging::{MessageBus, NatsMessageBus};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use transaction_service::auth::JwtKeys;
use transaction_service::config::Config;
use transaction_service::saga::{AckRegistry, TransactionSaga};
use transaction_service::store::{PostgresTransactionStore, PostgresUserStore};
use transaction_service::{AppState, cors_layer, create_app};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Database pool and migrations
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store = PostgresTransactionStore::new(pool.clone());
    store.run_migrations().await.expect("migrations failed");
    let users = PostgresUserStore::new(pool.clone());

    // 5. Broker connection and the ack registry; the registry must be
    //    listening before the first saga publishes
    let bus = Arc::new(
        NatsMessageBus::connect(&config.nats_url)
            .await
            .expect("failed to connect to broker"),
    );
    let registry = AckRegistry::new();
    registry
        .start(bus.clone())
        .await
        .expect("failed to start ack registry");

    // 6. Application state
    let saga = TransactionSaga::new(
        store.clone(),
        bus.clone(),
        registry.clone(),
        config.service_name.clone(),
        config.audit_ack_timeout,
    );
    let state = Arc::new(AppState {
        saga,
        store,
        users,
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_expires_in),
        registry: registry.clone(),
    });

    // 7. Build and serve
    let cors = cors_layer(&config.allowed_origins, config.deployment_env);
    let app = create_app(state, metrics_handle, cors);

    let addr = config.addr();
    tracing::info!(%addr, "starting transaction service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 8. Drain: cancel outstanding sagas, flush the broker, close the pool
    registry.shutdown();
    if let Err(e) = bus.close().await {
        tracing::warn!(error = %e, "broker drain failed");
    }
    pool.close().await;
    tracing::info!("server shut down gracefully");
}
