use peg_relayer::config::Config;
use peg_relayer::worker::WorkerManager;
use peg_relayer::{api, db, reconcile};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // Initialize logging
    init_logging();

    tracing::info!("Starting Peg Bridge Relayer");

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        source_chain_id = config.source.chain_id,
        destination_chain_id = config.destination.chain_id,
        "Configuration loaded"
    );

    // Connect to database
    let db = db::create_pool(&config.database.url).await?;
    tracing::info!("Database connected");

    // Run migrations
    db::run_migrations(&db).await?;
    tracing::info!("Database migrations complete");

    // Create shutdown channels
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_tx2, shutdown_rx2) = tokio::sync::mpsc::channel::<()>(1);

    // Setup signal handlers
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
        let _ = shutdown_tx2.send(()).await;
    });

    // Create workers for both bridge directions
    let worker_manager = WorkerManager::new(&config, db.clone())?;
    tracing::info!("Workers initialized, starting processing");

    // Start metrics/API server
    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], 9090));
    let api_db = db.clone();
    let api_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_db, api_config).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Run the direction workers and the reconciliation task concurrently
    tokio::select! {
        result = worker_manager.run(shutdown_rx) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker manager error");
            }
        }
        result = reconcile::run_reconcile_task(&config, db.clone(), shutdown_rx2) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Reconciliation task error");
            }
        }
    }

    tracing::info!("Peg Bridge Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,peg_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
