use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use publish_notifier::config;
use publish_notifier::scheduler::PublishScheduler;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one scheduled-publish pass over every watched collection and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit non-zero if any collection failed or any dispatch gave up
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    publish_notifier::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let store = publish_notifier::open_store(&cfg).await?;
    let sender = Arc::new(publish_notifier::build_sender(&cfg)?);

    let scheduler = PublishScheduler::new(
        Arc::new(store),
        sender,
        cfg.watched_collections(),
        cfg.scheduler_settings(),
    );
    let report = scheduler.tick(Utc::now()).await;

    for c in &report.collections {
        match &c.error {
            Some(err) => error!(collection = %c.collection, %err, "collection failed"),
            None => info!(
                collection = %c.collection,
                selected = c.selected,
                delivered = c.delivered,
                failed = c.failed,
                "collection processed"
            ),
        }
    }

    if args.strict && (report.failed() > 0 || report.errored().next().is_some()) {
        anyhow::bail!("publish tick finished with failures");
    }
    Ok(())
}
