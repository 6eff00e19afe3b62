//! Records written through the repository.
//!
//! The CMS owns documents; these exist so seeds, tests and the save-hook tool
//! can put rows in place.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::DocumentStatus;

/// A document as saved by the CMS. `id` is generated when absent.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub collection: String,
    pub id: Option<String>,
    pub status: DocumentStatus,
    /// Arbitrary field values; the label field is read from here.
    pub data: Value,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
}

impl NewDocument {
    pub fn new(collection: impl Into<String>, status: DocumentStatus, data: Value) -> Self {
        Self {
            collection: collection.into(),
            id: None,
            status,
            data,
            scheduled_publish_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_publish_at = Some(at);
        self
    }
}
