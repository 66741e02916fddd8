use std::net::SocketAddr;

use clap::Args;
use iotwatch_pipeline::{
    DefaultClientFactory, Pipeline, PipelineConfig, SharedClients, initialize, shutdown,
};
use iotwatch_trigger_http::TriggerAdapter;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{InvalidServerUrlSnafu, IoSnafu, PipelineSnafu, Result, StartupSnafu};

#[derive(Debug, Args)]
pub struct TriggerArgs {
    /// The address of the HTTP trigger server.
    #[arg(long, env = "FUNCTIONS_HTTPWORKER_ADDRESS", default_value = "127.0.0.1:7071")]
    http_address: String,
    #[clap(flatten)]
    config: PipelineConfig,
}

impl TriggerArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let address = self
            .http_address
            .parse::<SocketAddr>()
            .context(InvalidServerUrlSnafu {})?;

        let mut clients = initialize(&self.config, &DefaultClientFactory)
            .await
            .context(StartupSnafu {})?;

        let result = serve(&clients, address, ct).await;

        shutdown(&mut clients).await;
        info!("Shutdown complete");

        result
    }
}

async fn serve(clients: &SharedClients, address: SocketAddr, ct: CancellationToken) -> Result<()> {
    let Pipeline {
        orchestrator,
        emitter,
    } = Pipeline::new(clients).context(PipelineSnafu {})?;

    let app = TriggerAdapter::new(orchestrator).into_router();

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .context(IoSnafu {})?;

    info!(%address, "HTTP trigger listening");

    let telemetry_ct = CancellationToken::new();
    let server = async {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                ct.cancelled().await;
            })
            .await
            .context(IoSnafu {});
        telemetry_ct.cancel();
        result
    };

    let (result, summary) = tokio::join!(server, emitter.run(telemetry_ct.clone()));

    info!(
        pushed = summary.pushed,
        failed = summary.failed,
        abandoned = summary.abandoned,
        "HTTP trigger stopped"
    );

    result
}
