//! Audit service entry point.

use std::sync::Arc;

use messaging::{MessageBus, NatsMessageBus};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use audit_service::config::Config;
use audit_service::consumer::AuditConsumer;
use audit_service::store::PostgresAuditStore;
use audit_service::{AppState, cors_layer, create_app};

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
    let store = PostgresAuditStore::new(pool.clone());
    store.run_migrations().await.expect("migrations failed");

    // 5. Broker connection and the consumer pair; unprocessed messages on
    //    the durable stream are picked up here after a restart
    let bus = Arc::new(
        NatsMessageBus::connect(&config.nats_url)
            .await
            .expect("failed to connect to broker"),
    );
    let consumer = AuditConsumer::new(store.clone(), bus.clone());
    consumer.start().await.expect("failed to start consumer");

    // 6. Build and serve
    let state = Arc::new(AppState {
        store,
        bus: bus.clone(),
    });
    let cors = cors_layer(&config.allowed_origins, config.deployment_env);
    let app = create_app(state, metrics_handle, cors);

    let addr = config.addr();
    tracing::info!(%addr, "starting audit service");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Drain: let in-flight acks deliver, then close the pool
    if let Err(e) = bus.close().await {
        tracing::warn!(error = %e, "broker drain failed");
    }
    pool.close().await;
    tracing::info!("server shut down gracefully");
}
