use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use hotwallet::api;
use hotwallet::config::load_config;
use hotwallet::db::{PgStore, Store};
use hotwallet::fee::FeePolicy;
use hotwallet::gateway::{ChainGateway, EthereumGateway};
use hotwallet::signer::{RemoteSigner, TransactionSigner};
use hotwallet::workers::{ConfirmationWorker, SubmissionWorker};

#[derive(Parser, Debug)]
#[command(name = "hotwallet", about = "Exchange withdrawal engine")]
struct Cli {
    /// Path to a TOML config file; env vars override.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hotwallet withdrawal engine");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.get_db_url()?)
        .await?;

    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));

    let request_timeout = Duration::from_millis(config.ethereum.request_timeout_ms);
    let gateway: Arc<dyn ChainGateway> = Arc::new(EthereumGateway::new(
        Url::parse(&config.ethereum.get_rpc_url()?)?,
        request_timeout,
    ));
    let signer: Arc<dyn TransactionSigner> = Arc::new(RemoteSigner::new(
        Url::parse(&config.ethereum.get_signer_url()?)?,
        request_timeout,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let submission = SubmissionWorker::new(
        store.clone(),
        gateway.clone(),
        signer,
        FeePolicy::new(config.fee.clone()),
        config.submission.clone(),
        config.ethereum.chain_id,
    );
    let submission_rx = shutdown_rx.clone();
    let submission_handle = tokio::spawn(async move {
        submission.run(submission_rx).await;
    });

    let confirmation =
        ConfirmationWorker::new(store.clone(), gateway.clone(), config.confirmation.clone());
    let confirmation_rx = shutdown_rx.clone();
    let confirmation_handle = tokio::spawn(async move {
        confirmation.run(confirmation_rx).await;
    });

    let app = api::router(store);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API listening on {addr}");

    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = server_shutdown.changed().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("API server stopped with error: {:?}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, draining in-flight rows");
    let _ = shutdown_tx.send(true);

    let _ = submission_handle.await;
    let _ = confirmation_handle.await;
    let _ = server_handle.await;

    info!("Shutdown complete");
    Ok(())
}
