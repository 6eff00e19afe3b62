//! Polls watched collections for documents whose scheduled publish time has
//! passed and announces each one once.
//!
//! The watermark written after a successful send is what keeps the next tick
//! from selecting the same document again; a failed send leaves it alone so
//! the document is retried on the following tick.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::model::{EventKind, NotificationPayload, WatchedCollection};
use crate::store::DocumentStore;
use crate::webhook::{DispatchOutcome, WebhookSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Wait before the first tick so the store can finish booting.
    pub initial_delay: Duration,
    /// Time between tick starts.
    pub interval: Duration,
    /// Max documents taken from one collection per tick.
    pub page_size: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(60),
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: String,
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub collections: Vec<CollectionReport>,
}

impl TickReport {
    pub fn delivered(&self) -> usize {
        self.collections.iter().map(|c| c.delivered).sum()
    }

    pub fn failed(&self) -> usize {
        self.collections.iter().map(|c| c.failed).sum()
    }

    pub fn errored(&self) -> impl Iterator<Item = &CollectionReport> {
        self.collections.iter().filter(|c| c.error.is_some())
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == name)
    }
}

pub struct PublishScheduler {
    store: Arc<dyn DocumentStore>,
    sender: Arc<WebhookSender>,
    collections: Vec<WatchedCollection>,
    settings: SchedulerSettings,
}

impl PublishScheduler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sender: Arc<WebhookSender>,
        collections: Vec<WatchedCollection>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            sender,
            collections,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// One pass over every watched collection. Collections are handled
    /// concurrently and independently; nothing here returns an error.
    #[instrument(skip_all)]
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let collections = join_all(
            self.collections
                .iter()
                .map(|collection| self.tick_collection(collection, now)),
        )
        .await;
        let report = TickReport { collections };
        if report.delivered() > 0 || report.failed() > 0 {
            info!(
                delivered = report.delivered(),
                failed = report.failed(),
                "scheduler tick finished"
            );
        } else {
            debug!("scheduler tick found nothing due");
        }
        report
    }

    async fn tick_collection(
        &self,
        collection: &WatchedCollection,
        now: DateTime<Utc>,
    ) -> CollectionReport {
        let mut report = CollectionReport {
            collection: collection.name.clone(),
            ..Default::default()
        };
        let run = AssertUnwindSafe(self.process_collection(collection, now, &mut report))
            .catch_unwind()
            .await;
        match run {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(?err, collection = %collection.name, "scheduler tick error");
                report.error = Some(format!("{:#}", err));
            }
            Err(_) => {
                error!(collection = %collection.name, "scheduler tick panicked");
                report.error = Some("panicked while processing collection".into());
            }
        }
        report
    }

    async fn process_collection(
        &self,
        collection: &WatchedCollection,
        now: DateTime<Utc>,
        report: &mut CollectionReport,
    ) -> Result<()> {
        let page_size = self.settings.page_size;
        let mut due = self.store.find_due(collection, now, page_size).await?;
        due.truncate(page_size as usize);
        report.selected = due.len();

        for doc in &due {
            let Some(scheduled_at) = doc.scheduled_publish_at else {
                warn!(collection = %collection.name, id = %doc.id, "due document has no schedule; skipping");
                continue;
            };
            let payload = NotificationPayload::for_document(doc, EventKind::Scheduled);
            match self.sender.send(&payload).await {
                DispatchOutcome::Failed { attempts, .. } => {
                    warn!(collection = %collection.name, id = %doc.id, attempts, "watermark left for next tick");
                    report.failed += 1;
                }
                _ => {
                    self.store
                        .mark_publish_event(collection, &doc.id, scheduled_at)
                        .await?;
                    report.delivered += 1;
                }
            }
        }
        Ok(())
    }

    /// Run forever: wait `initial_delay`, then tick every `interval`. Each
    /// tick runs as its own task, so a slow tick may overlap the next.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(self.settings.initial_delay).await;
            info!(
                interval_secs = self.settings.interval.as_secs(),
                collections = self.collections.len(),
                "publish scheduler started"
            );

            let mut ticker = tokio::time::interval(self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        in_flight.spawn(async move { scheduler.tick(Utc::now()).await });
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(err) = joined {
                            error!(?err, "scheduler tick task failed");
                        }
                    }
                }
            }
        });
        SchedulerHandle { task }
    }
}

/// Owns the timer task. Dropping the handle leaves the scheduler running.
#[derive(Debug)]
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the timer together with any tick still in flight.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        info!("publish scheduler stopped");
    }
}
