use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use publish_notifier::config;
use publish_notifier::scheduler::PublishScheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    publish_notifier::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let store = publish_notifier::open_store(&cfg).await?;
    let sender = Arc::new(publish_notifier::build_sender(&cfg)?);
    if !sender.is_enabled() {
        warn!("no webhook url configured; scheduled publishes will not be announced");
    }

    let scheduler = Arc::new(PublishScheduler::new(
        Arc::new(store),
        sender,
        cfg.watched_collections(),
        cfg.scheduler_settings(),
    ));
    let handle = scheduler.start();

    info!("publish notifier running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    Ok(())
}
