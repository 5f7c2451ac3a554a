use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use ingest::FileIngestor;
use state_store::FileMetadataStore;
use tokio::{signal, sync::watch};
use tracing::info;

use crate::{
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
#[allow(dead_code)]
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub blob_storage: Arc<BlobStorage>,
    pub metadata_store: Arc<FileMetadataStore>,
    pub ingestor: Arc<FileIngestor>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let (shutdown_tx, _) = watch::channel(());
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        let metadata_store = Arc::new(
            FileMetadataStore::open(config.state_store_path.parse()?)
                .context("error opening FileMetadataStore")?,
        );
        let ingestor = Arc::new(
            FileIngestor::new(
                blob_storage.clone(),
                metadata_store.clone(),
                &config.checksum_algorithm,
                config.spool_path.clone().map(PathBuf::from),
            )
            .map_err(|e| anyhow!("error creating FileIngestor: {}", e))?,
        );
        Ok(Self {
            config,
            shutdown_tx,
            blob_storage,
            metadata_store,
            ingestor,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            ingestor: self.ingestor.clone(),
            metadata_store: self.metadata_store.clone(),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(route_state);
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down server gracefully");
}
