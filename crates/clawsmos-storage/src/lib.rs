//! In-memory snapshot storage + HTTP fetch utilities for Clawsmos.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clawsmos_core::Snapshot;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "clawsmos-storage";

/// Holder of the last committed [`Snapshot`].
///
/// Readers get an `Arc` to a fully built snapshot; `replace` swaps the pointer
/// in one step, so a reader sees either the previous snapshot or the new one.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Arc<Snapshot> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    /// Commits `next` as the current snapshot and returns the shared handle to it.
    pub fn replace(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&next);
        next
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.read().last_updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Bounty boards behind shared hosting flap with 5xx, 408 and 429; anything
/// else is a real answer.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RetryDisposition::Retryable,
        s if s.is_server_error() => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Sleep time spent between attempts when every retry is used.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Per-attempt timeouts never drop below this, however small the budget.
pub const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

impl HttpClientConfig {
    /// Config whose attempts and backoff sleeps all fit inside `budget`, so a
    /// source timing out once still has room to retry before the refresh
    /// cycle gives up on it.
    pub fn within_budget(budget: Duration, user_agent: Option<String>) -> Self {
        let backoff = BackoffPolicy::default();
        let attempts = backoff.max_retries as u32 + 1;
        let timeout = budget
            .saturating_sub(backoff.total_delay())
            .checked_div(attempts)
            .unwrap_or(budget)
            .max(MIN_ATTEMPT_TIMEOUT);
        Self {
            timeout,
            user_agent,
            backoff,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetch limiter closed")]
    LimiterClosed,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    fn request(&self, url: &str, headers: &BTreeMap<String, String>) -> reqwest::RequestBuilder {
        headers
            .iter()
            .fold(self.client.get(url), |req, (name, value)| {
                req.header(name.as_str(), value.as_str())
            })
    }

    /// GETs `url` with the given extra headers and decodes the body as JSON.
    ///
    /// Server errors, 429s, timeouts and connect failures are retried per the
    /// backoff policy; anything else fails immediately.
    pub async fn fetch_json(
        &self,
        run_id: Uuid,
        source: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", %run_id, source, url);
        self.fetch_json_inner(url, headers).instrument(span).await
    }

    async fn fetch_json_inner(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<JsonValue, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let mut attempt = 0usize;
        loop {
            let retry = match self.request(url, headers).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                            url: final_url,
                            source,
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    format!("status {status}")
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    err.to_string()
                }
            };

            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(attempt, ?delay, reason = %retry, "retrying fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
