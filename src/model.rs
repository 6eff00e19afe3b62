use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change announced to the build hook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Published,
    Updated,
    Unpublished,
    Scheduled,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Published => "published",
            EventKind::Updated => "updated",
            EventKind::Unpublished => "unpublished",
            EventKind::Scheduled => "scheduled",
        }
    }
}

/// Workflow state of a stored document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DocumentStatus::Draft),
            "published" => Some(DocumentStatus::Published),
            "archived" => Some(DocumentStatus::Archived),
            _ => None,
        }
    }
}

/// A collection that supports scheduled publishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchedCollection {
    pub name: String,
    /// Document field used as the `slug` of outgoing notifications.
    pub title_field: String,
}

impl WatchedCollection {
    pub fn new(name: impl Into<String>, title_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title_field: title_field.into(),
        }
    }

    /// Posts, pages and case studies, as deployed for the marketing site.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("posts", "slug"),
            Self::new("pages", "slug"),
            Self::new("case-studies", "clientName"),
        ]
    }
}

/// The slice of a CMS document the notifier reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub status: DocumentStatus,
    pub label: Option<String>,
    pub scheduled_publish_at: Option<DateTime<Utc>>,
    pub last_publish_event_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Whether a `scheduled` notification is owed for this document at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != DocumentStatus::Published {
            return false;
        }
        let Some(scheduled) = self.scheduled_publish_at else {
            return false;
        };
        if scheduled > now {
            return false;
        }
        match self.last_publish_event_at {
            None => true,
            Some(last) => last < scheduled,
        }
    }
}

/// JSON body posted to the build hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub collection: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        slug: Option<String>,
        event: EventKind,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            slug,
            event,
            timestamp: Utc::now(),
        }
    }

    pub fn for_document(document: &Document, event: EventKind) -> Self {
        Self::new(
            document.collection.clone(),
            document.id.clone(),
            document.label.clone(),
            event,
        )
    }

    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.collection, self.id, self.event.as_str())
    }
}
