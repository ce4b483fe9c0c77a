//! Payment reconciler entry point.

use std::sync::Arc;

use chain::{ChainClient, EthChainClient};
use metrics_exporter_prometheus::PrometheusBuilder;
use payment_store::{InMemoryPaymentStore, PaymentStore, PostgresPaymentStore};
use reconciler::ReconciliationEngine;
use service::{Config, LogFormat, ServiceError};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

fn init_tracing(config: &Config) -> Result<(), ServiceError> {
    let filter = EnvFilter::try_new(&config.log_level)?;
    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    init_tracing(&config)?;

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    service::routes::metrics::describe();

    // 3. Chain client
    let tokens = config.token_registry()?;
    let chain: Arc<dyn ChainClient> =
        Arc::new(EthChainClient::new(config.eth_client_config(), tokens)?);
    if config.rpc_ws_url.is_none() {
        tracing::warn!("RPC_WS_URL not set, live subscription will keep retrying; the sweep still runs");
    }

    // 4. Store, then run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(&url).await?;
            let store = PostgresPaymentStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL payment store");
            run(config, store, chain, metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory payment store");
            run(config, InMemoryPaymentStore::new(), chain, metrics_handle).await
        }
    }
}

async fn run<S: PaymentStore + Clone + 'static>(
    config: Config,
    store: S,
    chain: Arc<dyn ChainClient>,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), ServiceError> {
    let shutdown = CancellationToken::new();
    let engine =
        ReconciliationEngine::new(store, chain, config.reconciler_config()?, shutdown.clone());
    let engine_handle = engine.spawn();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let app = service::create_app(engine.health(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, contract = %config.contract_address, "starting payment reconciler");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    // Stop the loops even when the server failed; in-flight settlements finish
    shutdown.cancel();
    engine_handle.join().await;
    served?;

    tracing::info!("payment reconciler shut down gracefully");
    Ok(())
}
