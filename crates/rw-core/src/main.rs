//! rw_core daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rw_core::{Args, Core, CoreConfig, DetachedAdapter};

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

fn print_banner() {
    println!(r"                                   ");
    println!(r"  _ ____      __      ___ ___  _ __ ___ ");
    println!(r" | '__\ \ /\ / /____ / __/ _ \| '__/ _ \");
    println!(r" | |   \ V  V /_____| (_| (_) | | |  __/");
    println!(r" |_|    \_/\_/       \___\___/|_|  \___|");
    println!(r"                                   ");
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = CoreConfig::load_or_default(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config.log_level)?;
    if config.banner {
        print_banner();
    }

    info!(
        instance_id = %config.instance_id,
        kv_store_type = %config.kv_store.store_type,
        kv_store_address = %config.kv_store.address,
        adapter_address = %config.messaging.adapter_address,
        core_topic = %config.messaging.core_topic,
        "Starting rw_core"
    );

    let adapter = Arc::new(DetachedAdapter::new(config.messaging.adapter_address.clone()));
    let core = Core::start(config, adapter).await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received SIGINT, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
    }

    core.stop().await;
    info!("rw_core stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("rw_core error: {:#}", e);
            eprintln!("rw_core: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
