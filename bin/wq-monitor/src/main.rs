//! ---
//! wq_section: "01-core-functionality"
//! wq_subsection: "binary"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Binary entrypoint for the monitor daemon."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info};
use wq_common::{init_tracing, AppConfig, LoadedAppConfig};
use wq_core::{FanoutSink, JsonLinesSink, LogSink, MonitorRuntime};

const CONFIG_CANDIDATES: [&str; 2] = ["configs/monitor.toml", "/etc/wq/monitor.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("wq-monitor ", env!("CARGO_PKG_VERSION")),
    about = "Water-quality telemetry monitor",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Listen address, e.g. 0.0.0.0:8888")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "Echo every merged reading and link event to stdout as JSON lines")]
    json_stdout: bool,

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
        let monitor = &mut loaded.config.monitor;
        if let Some(listen) = self.listen {
            monitor.listen = listen;
        }
        if self.json_stdout {
            monitor.json_stdout = true;
        }
        loaded.config.validate().context("invalid command-line override")?;
        Ok(loaded)
    }
}

fn extended_version() -> String {
    format!(
        "wq-monitor {}\nbuilt: {}\ntarget: {}\nprofile: {}",
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
    init_tracing("wq-monitor", &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let result = run_monitor(&loaded.config).await;
    if let Err(err) = &result {
        error!(error = %format!("{:#}", err), "monitor stopped on error");
    }
    result
}

async fn run_monitor(config: &AppConfig) -> Result<()> {
    let mut sink = FanoutSink::new().with(LogSink::new("monitor"));
    if config.monitor.json_stdout {
        sink = sink.with(JsonLinesSink::new(io::stdout()));
    }
    let runtime = MonitorRuntime::bind(config, Box::new(sink)).await?;

    let signals = tokio::spawn(runtime.shutdown_handle().stop_on_signal());
    let summary = runtime.run().await?;
    signals.abort();

    info!(
        sessions = summary.sessions,
        rejections = summary.rejections,
        frames_decoded = summary.frames_decoded,
        parse_errors = summary.parse_errors,
        "monitor exited cleanly"
    );
    Ok(())
}
