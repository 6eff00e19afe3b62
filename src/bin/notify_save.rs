use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use publish_notifier::config;
use publish_notifier::db;
use publish_notifier::hooks;
use publish_notifier::model::DocumentStatus;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Announce a document save (published/updated/unpublished) to the build hook"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Collection name, e.g. posts
    #[arg(long)]
    collection: String,

    /// Document id
    #[arg(long)]
    id: String,

    /// Status before the save; omit for a newly created document
    #[arg(long)]
    previous_status: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    publish_notifier::init_tracing();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let collection = cfg
        .collection(&args.collection)
        .ok_or_else(|| anyhow!("collection {} is not configured", args.collection))?;
    let previous = args
        .previous_status
        .as_deref()
        .map(|s| {
            DocumentStatus::parse_status(s).ok_or_else(|| anyhow!("unknown status {}", s))
        })
        .transpose()?;

    let store = publish_notifier::open_store(&cfg).await?;
    let document = db::get_document(
        store.pool(),
        &collection.name,
        &collection.title_field,
        &args.id,
    )
    .await?
    .ok_or_else(|| anyhow!("document {}/{} not found", collection.name, args.id))?;

    let sender = publish_notifier::build_sender(&cfg)?;
    match hooks::notify_saved(&sender, previous, &document).await {
        Some(outcome) if !outcome.is_success() => Err(anyhow!("notification failed: {:?}", outcome)),
        Some(outcome) => {
            info!(?outcome, "save announced");
            Ok(())
        }
        None => {
            info!("nothing to announce");
            Ok(())
        }
    }
}
