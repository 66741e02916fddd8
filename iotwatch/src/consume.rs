use clap::Args;
use iotwatch_pipeline::{DefaultClientFactory, PipelineConfig, initialize, run_consumer, shutdown};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{PipelineSnafu, Result, StartupSnafu};

#[derive(Debug, Args)]
pub struct ConsumeArgs {
    #[clap(flatten)]
    config: PipelineConfig,
}

impl ConsumeArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let mut clients = initialize(&self.config, &DefaultClientFactory)
            .await
            .context(StartupSnafu {})?;

        let result = run_consumer(&clients, ct).await;
        if let Err(err) = &result {
            error!(error = %err, "Consumer failed");
        }

        shutdown(&mut clients).await;
        info!("Shutdown complete");

        result.context(PipelineSnafu {})
    }
}
