//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "binary"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Binary entrypoint for the sensor node daemon."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info, warn};
use wq_common::{init_tracing, AppConfig, LoadedAppConfig};
use wq_core::{LogSink, NodeRuntime};
use wq_msg::WireFormat;
use wq_sim::SimulatedProducer;

const CONFIG_CANDIDATES: [&str; 2] = ["configs/node.toml", "/etc/wq/node.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("wq-node ", env!("CARGO_PKG_VERSION")),
    about = "Water-quality sensor node",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "IP", help = "Monitor IPv4 address; overrides the config and address file")]
    address: Option<String>,

    #[arg(long, value_name = "PORT", help = "Monitor TCP port")]
    port: Option<u16>,

    #[arg(long, value_name = "FORMAT", help = "Frame encoding: bare or quoted")]
    wire_format: Option<WireFormat>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,
}

impl Cli {
    fn load_config(&self) -> Result<LoadedAppConfig> {
        let mut loaded = match &self.config {
            Some(path) => LoadedAppConfig {
                config: AppConfig::from_path(path)?,
                source: Some(path.clone()),
            },
            None => AppConfig::load_or_default(&CONFIG_CANDIDATES)?,
        };
        let node = &mut loaded.config.node;
        if let Some(address) = &self.address {
            node.monitor_address = Some(address.clone());
        }
        if let Some(port) = self.port {
            node.port = port;
        }
        if let Some(format) = self.wire_format {
            loaded.config.wire.format = format;
        }
        loaded.config.validate().context("invalid command-line override")?;
        Ok(loaded)
    }
}

fn extended_version() -> String {
    format!(
        "wq-node {}\nbuilt: {}\ntarget: {}\nprofile: {}",
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_BUILD_TIMESTAMP"),
        env!("VERGEN_CARGO_TARGET_TRIPLE"),
        if env!("VERGEN_CARGO_DEBUG") == "true" { "debug" } else { "release" },
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", extended_version());
        return Ok(());
    }

    let loaded = cli.load_config()?;
    init_tracing("wq-node", &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let result = run_node(&loaded.config).await;
    if let Err(err) = &result {
        error!(error = %format!("{:#}", err), "node stopped on error");
    }
    result
}

async fn run_node(config: &AppConfig) -> Result<()> {
    warn!(
        seed = config.node.simulation.seed,
        "no sensor hardware driver configured; sampling the simulated front-end"
    );
    let producer = SimulatedProducer::new(&config.node.simulation)?;
    let runtime =
        NodeRuntime::start(config, Box::new(producer), Box::new(LogSink::new("node"))).await?;

    let signals = tokio::spawn(runtime.shutdown_handle().stop_on_signal());
    let summary = runtime.run().await?;
    signals.abort();

    info!(
        frames_sent = summary.frames_sent,
        frames_skipped = summary.frames_skipped,
        reconnects = summary.reconnects,
        "node exited cleanly"
    );
    Ok(())
}
