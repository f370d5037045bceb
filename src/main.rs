use anyhow::{Context, Result};
use cadvisor_relabel::agent::Agent;
use cadvisor_relabel::config::{ConfigBuilder, LogLevel, RelabelConfig};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "cadvisor-relabel",
    version,
    about = "Aggregates kubelet cAdvisor metrics and enriches them with pod labels"
)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the metrics endpoint
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long)]
    log_level: Option<String>,
}

fn load(args: &Args) -> Result<RelabelConfig> {
    let mut builder = ConfigBuilder::<RelabelConfig>::new().use_defaults();
    if let Some(path) = &args.config {
        builder = builder.add_file(path);
    }

    let mut config = builder
        .add_env("RELABEL")
        .build()
        .context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = &args.log_level {
        config.log_level = LogLevel::parse(level);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load(&args) {
        Ok(config) => {
            cadvisor_relabel::init_logging(&config.log_level);
            config
        }
        Err(e) => {
            cadvisor_relabel::init_logging(&LogLevel::Error);
            error!("{:#}", e);
            return Err(e);
        }
    };

    info!(
        "Starting cadvisor-relabel {} (port: {}, labels: {:?})",
        cadvisor_relabel::VERSION,
        config.port,
        config.add_labels
    );

    let agent = Agent::new(config).context("Failed to build agent")?;
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received interrupt, shutting down"),
                Err(e) => error!("Failed to listen for interrupt: {}", e),
            }
            cancel.cancel();
        });
    }

    agent.run(cancel).await.context("Agent failed")?;
    Ok(())
}
