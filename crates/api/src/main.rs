//! Service entry point: wires the store, bus, relay, saga, notifier, and
//! HTTP server together.

use std::time::Duration;

use event_store::PostgresEventStore;
use messaging::{OutboxRelay, RabbitMqBus};
use notifier::{ConsoleNotifier, NotificationSubscriber};
use saga::{MockPriceService, MockSwapWorker, SagaOrchestrator};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const STARTUP_ATTEMPTS: u32 = 10;
const STARTUP_DELAY: Duration = Duration::from_secs(2);

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

async fn connect_database(config: &api::Config) -> sqlx::PgPool {
    let mut last_error = None;
    for attempt in 1..=STARTUP_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return pool,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "database connect failed");
                last_error = Some(e);
                tokio::time::sleep(STARTUP_DELAY).await;
            }
        }
    }
    panic!(
        "failed to connect to database after {STARTUP_ATTEMPTS} attempts: {:?}",
        last_error
    );
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = api::Config::from_env();

    // 3. Database and event store
    let pool = connect_database(&config).await;
    let event_store = PostgresEventStore::new(pool);
    event_store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("event store ready");

    // 4. Message bus
    let bus = RabbitMqBus::connect_with_retry(
        &config.message_bus_url,
        STARTUP_ATTEMPTS,
        STARTUP_DELAY,
    )
    .await
    .expect("failed to connect to message bus");

    // 5. Background workers share a shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = OutboxRelay::new(event_store.clone(), bus.clone())
        .with_tuning(config.outbox_interval, config.outbox_batch_size);
    let relay_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { relay.run(shutdown_rx).await }
    });

    // External services are in-memory stand-ins; real adapters plug in
    // behind the PriceService and SwapWorker traits.
    let orchestrator = SagaOrchestrator::new(
        event_store.clone(),
        bus.clone(),
        MockPriceService::new(),
        MockSwapWorker::new(),
    );
    orchestrator.start().await.expect("failed to start saga");

    let notifications = NotificationSubscriber::new(event_store.clone(), ConsoleNotifier);
    notifications
        .start(&bus)
        .await
        .expect("failed to start notification subscriber");

    // 6. HTTP server
    let state = api::create_state(event_store);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. HTTP acceptor is down; drain the workers.
    let _ = shutdown_tx.send(true);
    let _ = relay_handle.await;

    tracing::info!("server shut down gracefully");
}
