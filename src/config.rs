//! Configuration loader and validator for the publish notifier.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::WatchedCollection;
use crate::scheduler::SchedulerSettings;
use crate::webhook::{RetryPolicy, WebhookEndpoint};

pub const ENV_WEBHOOK_URL: &str = "PUBLISH_WEBHOOK_URL";
pub const ENV_WEBHOOK_SECRET: &str = "PUBLISH_WEBHOOK_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema. Every section may be
/// omitted and falls back to the deployed defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub webhook: Webhook,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default = "WatchedCollection::defaults")]
    pub collections: Vec<WatchedCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
        }
    }
}

/// Build hook settings. Leaving `url` unset disables delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Webhook {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_delays_seconds: Vec<u64>,
    pub dedup_window_seconds: u64,
}

impl Default for Webhook {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_seconds: 10,
            max_attempts: 3,
            retry_delays_seconds: vec![30, 120, 180],
            dedup_window_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Scheduler {
    pub initial_delay_seconds: u64,
    pub interval_seconds: u64,
    pub page_size: u32,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            initial_delay_seconds: 5,
            interval_seconds: 60,
            page_size: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: App::default(),
            webhook: Webhook::default(),
            scheduler: Scheduler::default(),
            collections: WatchedCollection::defaults(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins; otherwise a file in the data dir.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/cms.db", self.app.data_dir))
    }

    pub fn webhook_endpoint(&self) -> Result<Option<WebhookEndpoint>, ConfigError> {
        let Some(raw) = non_empty(&self.webhook.url) else {
            return Ok(None);
        };
        let url = parse_hook_url(raw)?;
        Ok(Some(WebhookEndpoint::new(
            url,
            non_empty(&self.webhook.secret).map(str::to_string),
        )))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.webhook.max_attempts,
            delays: self
                .webhook
                .retry_delays_seconds
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook.timeout_seconds)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.webhook.dedup_window_seconds)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            initial_delay: Duration::from_secs(self.scheduler.initial_delay_seconds),
            interval: Duration::from_secs(self.scheduler.interval_seconds),
            page_size: self.scheduler.page_size,
        }
    }

    pub fn watched_collections(&self) -> Vec<WatchedCollection> {
        self.collections.clone()
    }

    pub fn collection(&self, name: &str) -> Option<&WatchedCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Replace the webhook url/secret with the given values when present.
    pub fn apply_overrides(&mut self, url: Option<String>, secret: Option<String>) {
        if let Some(url) = url {
            self.webhook.url = Some(url);
        }
        if let Some(secret) = secret {
            self.webhook.secret = Some(secret);
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_hook_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|_| ConfigError::Invalid("webhook.url must be an absolute URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::Invalid("webhook.url must use http or https")),
    }
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(
        std::env::var(ENV_WEBHOOK_URL).ok(),
        std::env::var(ENV_WEBHOOK_SECRET).ok(),
    );
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if let Some(raw) = non_empty(&cfg.webhook.url) {
        parse_hook_url(raw)?;
    }
    if cfg.webhook.max_attempts == 0 {
        return Err(ConfigError::Invalid("webhook.max_attempts must be >= 1"));
    }
    if cfg.webhook.retry_delays_seconds.is_empty() {
        return Err(ConfigError::Invalid(
            "webhook.retry_delays_seconds must list at least one delay",
        ));
    }
    if cfg.webhook.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("webhook.timeout_seconds must be > 0"));
    }

    if cfg.scheduler.interval_seconds == 0 {
        return Err(ConfigError::Invalid("scheduler.interval_seconds must be > 0"));
    }
    if cfg.scheduler.page_size == 0 {
        return Err(ConfigError::Invalid("scheduler.page_size must be > 0"));
    }

    if cfg.collections.is_empty() {
        return Err(ConfigError::Invalid("collections must list at least one entry"));
    }
    let mut seen = HashSet::new();
    for c in &cfg.collections {
        if c.name.trim().is_empty() {
            return Err(ConfigError::Invalid("collections[].name must be non-empty"));
        }
        if c.title_field.trim().is_empty() {
            return Err(ConfigError::Invalid("collections[].title_field must be non-empty"));
        }
        if !seen.insert(c.name.as_str()) {
            return Err(ConfigError::Invalid("collections[].name must be unique"));
        }
    }

    Ok(())
}

/// Example configuration matching the deployed defaults.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

webhook:
  # Leave empty to disable notifications.
  url: "https://api.netlify.com/build_hooks/YOUR_HOOK_ID"
  secret: ""
  timeout_seconds: 10
  max_attempts: 3
  retry_delays_seconds: [30, 120, 180]
  dedup_window_seconds: 120

scheduler:
  initial_delay_seconds: 5
  interval_seconds: 60
  page_size: 50

collections:
  - name: posts
    title_field: slug
  - name: pages
    title_field: slug
  - name: case-studies
    title_field: clientName
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.collections, WatchedCollection::defaults());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.scheduler_settings(), SchedulerSettings::default());
        assert_eq!(cfg.dedup_window(), Duration::from_secs(120));
    }

    #[test]
    fn omitted_sections_use_defaults() {
        let cfg: Config = serde_yaml::from_str("app:\n  data_dir: /tmp/x\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.webhook, Webhook::default());
        assert_eq!(cfg.collections.len(), 3);
        assert!(cfg.webhook_endpoint().unwrap().is_none());
    }

    #[test]
    fn empty_url_disables_webhook() {
        let mut cfg = Config::default();
        cfg.webhook.url = Some("   ".into());
        validate(&cfg).unwrap();
        assert!(cfg.webhook_endpoint().unwrap().is_none());
    }

    #[test]
    fn endpoint_carries_secret() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert!(cfg.webhook_endpoint().unwrap().unwrap().secret.is_none());
        cfg.apply_overrides(None, Some("tok".into()));
        let endpoint = cfg.webhook_endpoint().unwrap().unwrap();
        assert_eq!(endpoint.secret.as_deref(), Some("tok"));
    }

    #[test]
    fn overrides_replace_url() {
        let mut cfg = Config::default();
        cfg.apply_overrides(Some("http://localhost:9999/hook".into()), None);
        let endpoint = cfg.webhook_endpoint().unwrap().unwrap();
        assert_eq!(endpoint.url.as_str(), "http://localhost:9999/hook");
    }

    #[test]
    fn invalid_url() {
        let mut cfg = Config::default();
        cfg.webhook.url = Some("not a url".into());
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("webhook.url")), _ => panic!("wrong error") }

        cfg.webhook.url = Some("ftp://example.com/hook".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_scheduler_values() {
        let mut cfg = Config::default();
        cfg.scheduler.interval_seconds = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("interval_seconds")), _ => panic!("wrong error") }

        let mut cfg = Config::default();
        cfg.scheduler.page_size = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = Config::default();
        cfg.webhook.max_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = Config::default();
        cfg.webhook.retry_delays_seconds.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_collections() {
        let mut cfg = Config::default();
        cfg.collections.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = Config::default();
        cfg.collections.push(WatchedCollection::new("posts", "title"));
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("unique")), _ => panic!("wrong error") }

        let mut cfg = Config::default();
        cfg.collections[2].title_field = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = Config::default();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.collection("case-studies").unwrap().title_field, "clientName");
    }
}
