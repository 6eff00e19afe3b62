use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{self, Pool};
use crate::model::{Document, WatchedCollection};

/// The narrow view of the CMS document store the scheduler depends on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Up to `limit` documents of `collection` that are due a `scheduled`
    /// notification at `now`. No ordering guarantee.
    async fn find_due(
        &self,
        collection: &WatchedCollection,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>>;

    /// Set `last_publish_event_at` on one document. Touches nothing else.
    async fn mark_publish_event(
        &self,
        collection: &WatchedCollection,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: Pool,
}

impl SqliteDocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn find_due(
        &self,
        collection: &WatchedCollection,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Document>> {
        db::find_due_documents(
            &self.pool,
            &collection.name,
            &collection.title_field,
            now,
            limit,
        )
        .await
    }

    async fn mark_publish_event(
        &self,
        collection: &WatchedCollection,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        db::set_last_publish_event_at(&self.pool, &collection.name, id, at).await
    }
}
