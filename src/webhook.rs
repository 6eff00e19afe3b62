use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::idempotency::{IdempotencyCache, DEFAULT_DEDUP_WINDOW};
use crate::model::NotificationPayload;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to reach webhook: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Build hook location plus the optional shared secret sent as `?secret=`.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookEndpoint {
    pub url: Url,
    pub secret: Option<String>,
}

impl fmt::Debug for WebhookEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookEndpoint")
            .field("url", &self.url.as_str())
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl WebhookEndpoint {
    pub fn new(url: Url, secret: Option<String>) -> Self {
        Self {
            url,
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn target_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(secret) = &self.secret {
            url.query_pairs_mut().append_pair("secret", secret);
        }
        url
    }
}

/// Bounded attempt count with an ordered list of pauses between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(30),
                Duration::from_secs(120),
                Duration::from_secs(180),
            ],
        }
    }
}

impl RetryPolicy {
    /// Pause after attempt `failed_attempt` (1-based) failed. Past the end of
    /// the schedule the last delay repeats.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let idx = failed_attempt.saturating_sub(1) as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

/// A single POST of a payload. Retries live in [`WebhookSender`].
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &Url, payload: &NotificationPayload) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let http = Client::builder()
            .user_agent(concat!("publish-notifier/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub fn build_request(
        &self,
        url: &Url,
        payload: &NotificationPayload,
    ) -> Result<reqwest::Request, DeliveryError> {
        Ok(self
            .http
            .post(url.clone())
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec(payload)?)
            .build()?)
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(&self, url: &Url, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let request = self.build_request(url, payload)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Status { status, body });
        }
        debug!(%status, "webhook accepted");
        Ok(())
    }
}

/// What happened to one `send` call.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// No endpoint configured; nothing was sent.
    Disabled,
    /// Same event went out within the dedup window.
    Suppressed,
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: DeliveryError },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, DispatchOutcome::Failed { .. })
    }
}

/// Posts notifications with dedup and bounded retries.
///
/// One sender is shared by the scheduler and the save hooks so both paths see
/// the same [`IdempotencyCache`].
pub struct WebhookSender {
    endpoint: Option<WebhookEndpoint>,
    transport: Arc<dyn WebhookTransport>,
    cache: Arc<IdempotencyCache>,
    retry: RetryPolicy,
    dedup_window: Duration,
}

impl fmt::Debug for WebhookSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSender")
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .field("dedup_window", &self.dedup_window)
            .finish_non_exhaustive()
    }
}

impl WebhookSender {
    pub fn new(endpoint: Option<WebhookEndpoint>, transport: Arc<dyn WebhookTransport>) -> Self {
        Self {
            endpoint,
            transport,
            cache: Arc::new(IdempotencyCache::new()),
            retry: RetryPolicy::default(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn with_cache(mut self, cache: Arc<IdempotencyCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<IdempotencyCache> {
        &self.cache
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Deliver `payload`. Blocks through the whole backoff schedule on
    /// failure, so call it from background work only.
    #[instrument(skip_all, fields(collection = %payload.collection, id = %payload.id, event = payload.event.as_str()))]
    pub async fn send(&self, payload: &NotificationPayload) -> DispatchOutcome {
        let Some(endpoint) = &self.endpoint else {
            return DispatchOutcome::Disabled;
        };

        let key = payload.dedup_key();
        if self.cache.should_suppress(&key) {
            debug!(key = %key, "duplicate within dedup window; skipping");
            return DispatchOutcome::Suppressed;
        }

        let url = endpoint.target_url();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.post(&url, payload).await {
                Ok(()) => {
                    self.cache.record(&key, self.dedup_window);
                    info!(attempt, "webhook delivered");
                    return DispatchOutcome::Delivered { attempts: attempt };
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(?err, attempt, delay_secs = delay.as_secs(), "webhook failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(?err, attempt, "webhook failed; giving up");
                    return DispatchOutcome::Failed {
                        attempts: attempt,
                        error: err,
                    };
                }
            }
        }
    }
}
