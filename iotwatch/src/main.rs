use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::{
    consume::ConsumeArgs,
    error::{ObservabilitySnafu, Result},
    simulate::SimulateArgs,
    trigger::TriggerArgs,
};

mod consume;
mod error;
mod simulate;
mod trigger;

#[derive(Parser)]
#[command(name = "iotwatch")]
#[command(about = "IoT sensor anomaly detection pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume sensor readings from the stream until interrupted
    Consume {
        #[clap(flatten)]
        inner: ConsumeArgs,
    },
    /// Serve the HTTP trigger endpoint for host-delivered batches
    Trigger {
        #[clap(flatten)]
        inner: TriggerArgs,
    },
    /// Replay the turbofan dataset as JSON lines
    Simulate {
        #[clap(flatten)]
        inner: SimulateArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    iotwatch_observability::init_observability(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
    .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Consume { inner } => inner.run(ct).await,
        Commands::Trigger { inner } => inner.run(ct).await,
        Commands::Simulate { inner } => inner.run(ct).await,
    }
}
