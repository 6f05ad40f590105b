use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::text;

/// Maximum title length carried into the data model; downstream message
/// limits assume it.
pub const TITLE_MAX: usize = 250;
/// Maximum body length, same reasoning.
pub const BODY_MAX: usize = 400;

/// One normalized unit of content from any source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub source_key: String,
    pub published_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
}

impl Item {
    /// Builds a normalized item. The id falls back to the URL when the
    /// upstream omits one; title and body are capped at the model limits.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let id = {
            let id = id.into();
            if id.is_empty() { url.clone() } else { id }
        };
        Self {
            id,
            title: text::truncate(&title.into(), TITLE_MAX),
            body: None,
            url,
            source_key: source_key.into(),
            published_at: None,
            image_url: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            self.body = Some(text::truncate(&body, BODY_MAX));
        }
        self
    }

    pub fn with_published_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.published_at = at;
        self
    }

    pub fn with_image_url(mut self, image_url: Option<String>) -> Self {
        self.image_url = image_url;
        self
    }
}

/// What kind of upstream a binding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Scrape,
    Api,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Scrape => "scrape",
            SourceKind::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rss" => Some(SourceKind::Rss),
            "scrape" => Some(SourceKind::Scrape),
            "api" => Some(SourceKind::Api),
            _ => None,
        }
    }

    /// Rate-limiter service name for this kind of fetch.
    pub fn service(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Scrape => "scrape",
            SourceKind::Api => "api",
        }
    }
}

/// Where items from one source go for one owner scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBinding {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub channel: String,
    pub enabled: bool,
    pub translate: bool,
}

impl SourceBinding {
    /// Stable key used for dedup records and logging. RSS feeds are keyed
    /// by URL so renaming a feed does not re-deliver its backlog.
    pub fn source_key(&self) -> String {
        match self.kind {
            SourceKind::Rss => format!("rss:{}", self.url),
            _ => self.name.to_lowercase(),
        }
    }
}

/// All bindings configured for one owner scope.
#[derive(Debug, Clone)]
pub struct OwnerConfig {
    pub owner_id: i64,
    pub bindings: Vec<SourceBinding>,
}

/// Runtime configuration with environment overrides.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub check_interval_secs: u64,
    pub health_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
    pub max_retries: u32,
    pub retry_base_delay_secs: f64,
    pub retry_max_delay_secs: f64,
    pub retry_exponential_base: f64,
    pub max_items_per_source: usize,
    pub fetch_concurrency: usize,
    pub health_failure_threshold: u32,
    pub delivery_retention_days: u32,
    pub cache_retention_days: u32,
    pub target_language: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 180,
            health_interval_secs: 6 * 3600,
            request_timeout_secs: 30,
            user_agent: "news-relay/0.1".to_string(),
            max_redirects: 5,
            max_retries: 3,
            retry_base_delay_secs: 1.0,
            retry_max_delay_secs: 60.0,
            retry_exponential_base: 2.0,
            max_items_per_source: 5,
            fetch_concurrency: 4,
            health_failure_threshold: 3,
            delivery_retention_days: 30,
            cache_retention_days: 90,
            target_language: "en".to_string(),
        }
    }
}

impl RelayConfig {
    /// Overlays environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("CHECK_INTERVAL_SECS") {
            config.check_interval_secs = v
                .parse()
                .map_err(|_| RelayError::Config(format!("bad CHECK_INTERVAL_SECS: {v}")))?;
        }
        if let Ok(v) = std::env::var("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = v
                .parse()
                .map_err(|_| RelayError::Config(format!("bad REQUEST_TIMEOUT_SECS: {v}")))?;
        }
        if let Ok(v) = std::env::var("MAX_RETRIES") {
            config.max_retries = v
                .parse()
                .map_err(|_| RelayError::Config(format!("bad MAX_RETRIES: {v}")))?;
        }
        if let Ok(v) = std::env::var("TARGET_LANGUAGE") {
            config.target_language = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs < 60 {
            return Err(RelayError::Config(
                "check_interval_secs must be at least 60".to_string(),
            ));
        }
        if self.max_retries < 1 {
            return Err(RelayError::Config(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs < 5 {
            return Err(RelayError::Config(
                "request_timeout_secs must be at least 5".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
