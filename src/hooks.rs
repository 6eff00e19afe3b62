//! Events raised when the CMS saves a document.
//!
//! These go through the same [`WebhookSender`] as the scheduler, so a save and
//! a tick that race on one document share a dedup window.

use tracing::debug;

use crate::model::{Document, DocumentStatus, EventKind, NotificationPayload};
use crate::webhook::{DispatchOutcome, WebhookSender};

/// Event implied by a save that moved a document from `previous` to `next`.
/// `previous` is `None` for a newly created document.
pub fn save_event(previous: Option<DocumentStatus>, next: DocumentStatus) -> Option<EventKind> {
    let was_published = previous == Some(DocumentStatus::Published);
    let is_published = next == DocumentStatus::Published;
    match (was_published, is_published) {
        (false, true) => Some(EventKind::Published),
        (true, false) => Some(EventKind::Unpublished),
        (true, true) => Some(EventKind::Updated),
        (false, false) => None,
    }
}

/// Announce a save. Returns `None` when the transition is not announced.
pub async fn notify_saved(
    sender: &WebhookSender,
    previous: Option<DocumentStatus>,
    document: &Document,
) -> Option<DispatchOutcome> {
    if !sender.is_enabled() {
        return None;
    }
    let Some(event) = save_event(previous, document.status) else {
        debug!(collection = %document.collection, id = %document.id, "save needs no notification");
        return None;
    };
    let payload = NotificationPayload::for_document(document, event);
    Some(sender.send(&payload).await)
}
