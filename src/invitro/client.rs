//! HTTP fetching for Invitro pages using wreq for TLS fingerprint emulation.
//!
//! Every request in a run goes through one [`InvitroClient`], so its permit
//! pool is the single global concurrency cap. Transient failures are retried
//! with exponential backoff plus jitter; anything else returns at once.

use crate::config::Config;
use crate::error::Cancelled;
use crate::invitro::models::FetchOutcome;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use wreq::Client;
use wreq_util::Emulation;

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9";

/// Trait for page fetching - enables mocking for tests.
#[async_trait]
pub trait PageFetch: Send + Sync {
    /// Fetches one URL.
    ///
    /// Transport problems never surface as errors: they end up as an outcome
    /// with an empty body. The production client only returns `Err` when the
    /// run is cancelled.
    async fn fetch(&self, url: &str) -> Result<FetchOutcome>;
}

/// HTTP statuses worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Attempt budget and timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per URL
    pub retries: u32,
    pub backoff: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
    /// Limit for one attempt, request and body read together
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.retries.max(1),
            backoff: Duration::try_from_secs_f64(config.backoff_secs).unwrap_or_default(),
            jitter: Duration::try_from_secs_f64(config.backoff_jitter_secs).unwrap_or_default(),
            timeout: config.timeout(),
        }
    }

    /// Deterministic part of the wait after failed attempt number `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff.checked_mul(2u32.pow(exponent)).unwrap_or(Duration::MAX)
    }

    /// Full wait after failed attempt number `attempt`: base delay plus jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt).saturating_add(self.jitter.mul_f64(rand::random::<f64>()))
    }
}

/// What one attempt produced.
#[derive(Debug)]
enum Attempt {
    /// Final answer, success or terminal status.
    Done(FetchOutcome),
    /// Retryable failure.
    Transient { status: Option<u16>, reason: String },
}

/// Invitro HTTP client with browser impersonation, a global permit pool and retries.
pub struct InvitroClient {
    client: Client,
    permits: Arc<Semaphore>,
    max_permits: usize,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl InvitroClient {
    /// Creates a client from the run configuration.
    pub fn new(config: &Config, cancel: CancellationToken) -> Result<Self> {
        Self::build(
            RetryPolicy::from_config(config),
            config.max_concurrent_fetches,
            config.proxy.as_deref(),
            cancel,
        )
    }

    /// Creates a client with explicit retry timing (for testing).
    pub fn with_policy(
        policy: RetryPolicy,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Self::build(policy, max_concurrent, None, cancel)
    }

    fn build(
        policy: RetryPolicy,
        max_concurrent: usize,
        proxy: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .timeout(policy.timeout)
            .connect_timeout(Duration::from_secs(10).min(policy.timeout));

        // Configure proxy if specified
        if let Some(proxy_url) = proxy {
            debug!("Configuring proxy: {}", proxy_url);
            let proxy = wreq::Proxy::all(proxy_url).context("Failed to configure proxy")?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to build HTTP client")?;
        let max_permits = max_concurrent.max(1);

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            policy,
            cancel,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Permits not currently held by an in-flight attempt.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Performs one attempt while holding a permit. The permit is released
    /// when this returns, before any backoff wait.
    async fn attempt(&self, url: &str) -> Attempt {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Attempt::Transient { status: None, reason: e.to_string() },
        };

        debug!("GET {}", url);

        match tokio::time::timeout(self.policy.timeout, self.get(url)).await {
            Err(_) => Attempt::Transient {
                status: None,
                reason: format!("timed out after {:.1}s", self.policy.timeout.as_secs_f64()),
            },
            Ok(Err(e)) => Attempt::Transient { status: None, reason: format!("{:#}", e) },
            Ok(Ok((status, body))) => classify(url, status, body),
        }
    }

    async fn get(&self, url: &str) -> Result<(u16, String)> {
        let response = self
            .client
            .get(url)
            .emulation(Emulation::Chrome131)
            .header("Accept", ACCEPT)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status().as_u16();
        let body = response.text().await.context("Failed to read response body")?;
        Ok((status, body))
    }
}

fn classify(url: &str, status: u16, body: String) -> Attempt {
    match status {
        200 => Attempt::Done(FetchOutcome::ok(url, body)),
        s if is_transient_status(s) => {
            Attempt::Transient { status: Some(s), reason: format!("transient status {}", s) }
        }
        s => {
            error!("Non-200 status {} for {}", s, url);
            Attempt::Done(FetchOutcome::terminal(url, s, body))
        }
    }
}

#[async_trait]
impl PageFetch for InvitroClient {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome> {
        let retries = self.policy.retries.max(1);
        let mut last_status = None;

        for attempt in 1..=retries {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Cancelled::new(url).into()),
                result = self.attempt(url) => result,
            };

            let (status, reason) = match result {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::Transient { status, reason } => (status, reason),
            };
            last_status = status.or(last_status);

            if attempt == retries {
                warn!("Error fetching {}: {}. Attempt {}/{}", url, reason, attempt, retries);
                break;
            }

            let wait = self.policy.delay(attempt);
            warn!(
                "Error fetching {}: {}. Retry {}/{} after {:.1}s",
                url,
                reason,
                attempt,
                retries,
                wait.as_secs_f64()
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Cancelled::new(url).into()),
                _ = tokio::time::sleep(wait) => {}
            }
        }

        error!("Failed to fetch {} after {} attempts", url, retries);
        Ok(FetchOutcome::exhausted(url, last_status))
    }
}
