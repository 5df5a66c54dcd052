//! suds Control Plane
//!
//! The control plane is the coordination service for a fleet of self-service
//! laundry machines. It provides the REST API for reservations and lifecycle
//! transitions, and keeps the record cache coherent with the backing store.

use std::sync::Arc;

use anyhow::Result;
use suds_control_plane::{
    api,
    auth::StaticTokenAuthenticator,
    cache::MachineCache,
    config::{self, StoreBackend},
    coordinator::ReservationCoordinator,
    device::{DeviceController, HttpDeviceController},
    reclaim::ReclaimWorker,
    state::AppState,
    store::{MachineStore, MemoryMachineStore, PgMachineStore},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SUDS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting suds control plane");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    // Connect to the machine store
    let store: Arc<dyn MachineStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let store = match PgMachineStore::connect(&config.database).await {
                Ok(store) => {
                    info!("Database connection established");
                    store
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            // Run migrations in dev mode
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = store.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory machine store; records will not survive a restart");
            Arc::new(MemoryMachineStore::new())
        }
    };

    // Device gateway client
    let device: Arc<dyn DeviceController> = Arc::new(HttpDeviceController::new(&config.device)?);
    info!(gateway_url = %config.device.gateway_url, "Device gateway configured");

    // The coordinator owns the process-wide record cache.
    let coordinator = Arc::new(ReservationCoordinator::new(
        Arc::clone(&store),
        device,
        MachineCache::new(),
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the reclaim worker when a max hold is configured
    let reclaim_handle = config.reclaim.clone().map(|reclaim_config| {
        let worker = ReclaimWorker::new(Arc::clone(&coordinator), reclaim_config);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        })
    });

    // Create application state
    let authenticator = Arc::new(StaticTokenAuthenticator::new(config.api_tokens.clone()));
    let state = AppState::new(coordinator, store, authenticator);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Wait for workers to finish
    if let Some(handle) = reclaim_handle {
        info!("Waiting for workers to shut down...");
        let shutdown_timeout = std::time::Duration::from_secs(10);
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Reclaim worker did not shut down in time");
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
