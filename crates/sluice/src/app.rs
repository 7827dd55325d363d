//! Process wiring: collaborators, HTTP server and graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use snafu::prelude::*;
use tokio::net::TcpListener;
use tracing::info;

use sluice_core::StoragePool;

use crate::auth::RequestAuthenticator;
use crate::config::Config;
use crate::error::{AppError, ConfigSnafu, KinesisSnafu, MetricsSnafu, ServeSnafu};
use crate::pipeline::DeliveryStreams;
use crate::server::router;
use crate::service::DeliveryStreamService;
use crate::sink::StorageSink;
use crate::source::{KinesisClient, ShardSourceRef};

/// A fully wired server, not yet listening.
#[derive(Debug)]
pub struct App {
    streams: Arc<DeliveryStreams>,
    router: Router,
}

impl App {
    /// Build every collaborator described by `config`.
    pub fn build(config: &Config) -> Result<Self, AppError> {
        let credentials = config.credentials.provider();

        let pool = Arc::new(StoragePool::new(config.storage.clone()));
        let source: Option<ShardSourceRef> = match &config.kinesis {
            Some(kinesis) => Some(Arc::new(
                KinesisClient::new(&kinesis.endpoint, &config.region, credentials.clone())
                    .context(KinesisSnafu)?,
            )),
            None => None,
        };

        let streams = Arc::new(DeliveryStreams::new(
            config.stream_settings(),
            Arc::new(StorageSink::new(pool)),
            source,
        ));
        let router = router(
            DeliveryStreamService::new(streams.clone()),
            RequestAuthenticator::new(credentials, &config.region),
        );

        Ok(Self { streams, router })
    }

    pub fn streams(&self) -> &Arc<DeliveryStreams> {
        &self.streams
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then stop every stream.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let address = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        info!(address = %address, "Listening");

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .context(ServeSnafu {
                address: address.clone(),
            });

        // Flush what was accepted even if the listener failed.
        self.streams.shutdown().await;
        served
    }
}

/// Install metrics, bind the configured address and run until a shutdown signal.
pub async fn run(config: Config) -> Result<(), AppError> {
    let address: SocketAddr = config.socket_addr().context(ConfigSnafu)?;
    sluice_core::init_metrics().context(MetricsSnafu)?;
    let app = App::build(&config)?;
    let listener = TcpListener::bind(address).await.context(ServeSnafu {
        address: address.to_string(),
    })?;
    app.serve(listener, sluice_core::shutdown_signal()).await
}
