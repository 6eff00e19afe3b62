//! Scheduled-publish webhook notifier for the marketing-site CMS.
//!
//! A [`scheduler::PublishScheduler`] polls the document store and hands due
//! documents to a shared [`webhook::WebhookSender`], which posts to the build
//! hook with dedup and retries. Save hooks in [`hooks`] use the same sender.

pub mod config;
pub mod db;
pub mod hooks;
pub mod idempotency;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod webhook;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Build the sender described by `cfg`. One instance should be shared by
/// every dispatch path in the process.
pub fn build_sender(cfg: &config::Config) -> Result<webhook::WebhookSender> {
    let transport = webhook::HttpTransport::new(cfg.request_timeout())
        .context("failed to build HTTP client")?;
    let endpoint = cfg.webhook_endpoint()?;
    Ok(webhook::WebhookSender::new(endpoint, Arc::new(transport))
        .with_retry(cfg.retry_policy())
        .with_dedup_window(cfg.dedup_window()))
}

/// Open (and migrate) the document store described by `cfg`.
pub async fn open_store(cfg: &config::Config) -> Result<store::SqliteDocumentStore> {
    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    Ok(store::SqliteDocumentStore::new(pool))
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
