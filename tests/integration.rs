use chrono::{DateTime, Duration, TimeZone, Utc};
use publish_notifier::config;
use publish_notifier::db::{self, NewDocument};
use publish_notifier::model::{DocumentStatus, EventKind, NotificationPayload, WatchedCollection};
use publish_notifier::scheduler::{PublishScheduler, SchedulerSettings};
use publish_notifier::store::SqliteDocumentStore;
use publish_notifier::webhook::{DeliveryError, WebhookSender, WebhookTransport};
use reqwest::{StatusCode, Url};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
struct PostCall {
    url: String,
    payload: NotificationPayload,
}

#[derive(Clone, Default)]
struct RecordingTransport {
    /// `false` entries fail the matching call; calls past the queue succeed.
    responses: Arc<Mutex<VecDeque<bool>>>,
    calls: Arc<Mutex<Vec<PostCall>>>,
}

impl RecordingTransport {
    fn with_responses(responses: Vec<bool>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn calls(&self) -> Vec<PostCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, url: &Url, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        self.calls.lock().await.push(PostCall {
            url: url.to_string(),
            payload: payload.clone(),
        });
        let ok = self.responses.lock().await.pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "build hook down".into(),
            })
        }
    }
}

/// Sender built from the example config, with the backoff shrunk so retries
/// finish quickly against the real clock.
fn sender_for(transport: &RecordingTransport, dedup_window: StdDuration) -> Arc<WebhookSender> {
    let mut cfg: config::Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.apply_overrides(None, Some("shh".into()));
    let endpoint = cfg.webhook_endpoint().unwrap();
    let mut retry = cfg.retry_policy();
    assert_eq!(retry.max_attempts, 3);
    retry.delays = vec![StdDuration::from_millis(5); 3];
    Arc::new(
        WebhookSender::new(endpoint, Arc::new(transport.clone()))
            .with_retry(retry)
            .with_dedup_window(dedup_window),
    )
}

fn scheduler_for(pool: &sqlx::SqlitePool, sender: Arc<WebhookSender>) -> PublishScheduler {
    PublishScheduler::new(
        Arc::new(SqliteDocumentStore::new(pool.clone())),
        sender,
        WatchedCollection::defaults(),
        SchedulerSettings::default(),
    )
}

async fn seed(pool: &sqlx::SqlitePool, collection: &str, id: &str, data: serde_json::Value) {
    let doc = NewDocument::new(collection, DocumentStatus::Published, data)
        .with_id(id)
        .scheduled_at(now() - Duration::minutes(3));
    db::upsert_document(pool, &doc).await.unwrap();
}

#[tokio::test]
async fn scheduled_document_is_announced_once() {
    let pool = setup_pool().await;
    seed(&pool, "posts", "p1", json!({"slug": "launch-day", "title": "Launch"})).await;
    seed(&pool, "case-studies", "c1", json!({"clientName": "Acme"})).await;

    let transport = RecordingTransport::default();
    // No dedup window: only the watermark can stop a second send.
    let scheduler = scheduler_for(&pool, sender_for(&transport, StdDuration::ZERO));

    let report = scheduler.tick(now()).await;
    assert_eq!(report.delivered(), 2);

    let calls = transport.calls().await;
    assert_eq!(calls.len(), 2);
    let post = calls.iter().find(|c| c.payload.collection == "posts").unwrap();
    assert_eq!(post.payload.slug.as_deref(), Some("launch-day"));
    assert_eq!(post.payload.event, EventKind::Scheduled);
    assert!(post.url.ends_with("?secret=shh"));
    let case = calls.iter().find(|c| c.payload.collection == "case-studies").unwrap();
    assert_eq!(case.payload.slug.as_deref(), Some("Acme"));

    let stored = db::get_document(&pool, "posts", "slug", "p1").await.unwrap().unwrap();
    assert_eq!(stored.last_publish_event_at, stored.scheduled_publish_at);

    let report = scheduler.tick(now() + Duration::minutes(5)).await;
    assert_eq!(report.delivered(), 0);
    assert_eq!(transport.calls().await.len(), 2);
}

#[tokio::test]
async fn exhausted_retries_leave_document_for_next_tick() {
    let pool = setup_pool().await;
    seed(&pool, "pages", "about", json!({"slug": "about"})).await;

    let transport = RecordingTransport::with_responses(vec![false, false, false]);
    let scheduler = scheduler_for(&pool, sender_for(&transport, StdDuration::from_secs(120)));

    let report = scheduler.tick(now()).await;
    let pages = report.collection("pages").unwrap();
    assert_eq!(pages.failed, 1);
    assert!(pages.error.is_none());
    assert_eq!(transport.calls().await.len(), 3);

    let stored = db::get_document(&pool, "pages", "slug", "about").await.unwrap().unwrap();
    assert!(stored.last_publish_event_at.is_none());

    let report = scheduler.tick(now()).await;
    assert_eq!(report.collection("pages").unwrap().delivered, 1);
    assert_eq!(transport.calls().await.len(), 4);
}

#[tokio::test]
async fn disabled_webhook_still_advances_watermark() {
    let pool = setup_pool().await;
    seed(&pool, "posts", "quiet", json!({"slug": "quiet"})).await;

    let transport = RecordingTransport::default();
    let sender = Arc::new(WebhookSender::new(None, Arc::new(transport.clone())));
    let scheduler = scheduler_for(&pool, sender);

    let report = scheduler.tick(now()).await;
    assert_eq!(report.delivered(), 1);
    assert!(transport.calls().await.is_empty());
    assert!(db::find_due_documents(&pool, "posts", "slug", now(), 50)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn page_cap_spreads_backlog_over_ticks() {
    let pool = setup_pool().await;
    for i in 0..55 {
        seed(&pool, "posts", &format!("p{:02}", i), json!({"slug": format!("post-{}", i)})).await;
    }

    let transport = RecordingTransport::default();
    let scheduler = scheduler_for(&pool, sender_for(&transport, StdDuration::from_secs(120)));

    let first = scheduler.tick(now()).await;
    assert_eq!(first.collection("posts").unwrap().selected, 50);
    let second = scheduler.tick(now()).await;
    assert_eq!(second.collection("posts").unwrap().selected, 5);
    assert_eq!(transport.calls().await.len(), 55);
}
