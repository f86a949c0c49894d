//! Retrying fetch client for the playbook content API.
//!
//! [`ApiClient`] issues a single `GET` per attempt, bounded by a per-attempt
//! timeout, and retries on every failure following a fixed backoff schedule.
//! The orchestrator only sees the [`ContentSource`] trait so tests can swap
//! in stub sources.

use std::time::Duration;

use async_trait::async_trait;
use playbook_shared::{LoadConfig, PlaybookError, Result};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// User agent sent with every request.
const USER_AGENT: &str = concat!("playbook-docs/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Raw content returned by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    /// Hypertext body of the publication.
    pub body: String,
    /// Content identifier reported by the source.
    pub content_id: String,
}

/// Anything that can produce the raw publication body.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Retrieve the publication, applying the source's own retry policy.
    async fn fetch(&self) -> Result<FetchedPayload>;
}

/// Options controlling the retry loop.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delays: Vec<Duration>,
    pub max_response_bytes: u64,
}

impl From<&LoadConfig> for FetchOptions {
    fn from(config: &LoadConfig) -> Self {
        Self {
            url: config.source_url.clone(),
            timeout: config.timeout,
            max_attempts: config.max_attempts,
            retry_delays: config.retry_delays.clone(),
            max_response_bytes: config.max_response_bytes,
        }
    }
}

impl FetchOptions {
    /// Backoff before the attempt following `attempt` (1-based).
    ///
    /// Clamped to the last configured delay when the schedule is shorter
    /// than the number of attempts.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.retry_delays
            .get(index)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    content_id: Option<String>,
    details: Option<EnvelopeDetails>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeDetails {
    body: Option<String>,
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// HTTP implementation of [`ContentSource`].
pub struct ApiClient {
    client: Client,
    opts: FetchOptions,
}

impl ApiClient {
    pub fn new(opts: FetchOptions) -> Result<Self> {
        if opts.max_attempts == 0 {
            return Err(PlaybookError::config("max_attempts must be at least 1"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| PlaybookError::fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, opts })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.opts
    }

    /// One bounded attempt: request, status, size, and envelope checks.
    async fn attempt(&self) -> Result<FetchedPayload> {
        let timeout = self.opts.timeout;
        match tokio::time::timeout(timeout, self.request()).await {
            Ok(result) => result,
            Err(_) => Err(PlaybookError::fetch(format!(
                "request timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn request(&self) -> Result<FetchedPayload> {
        let url = &self.opts.url;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaybookError::fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybookError::fetch_status(
                status.as_u16(),
                format!("{url}: HTTP {status}"),
            ));
        }

        let max = self.opts.max_response_bytes;
        if let Some(len) = response.content_length() {
            if len > max {
                return Err(PlaybookError::fetch(format!(
                    "response too large: content-length {len} exceeds {max} bytes"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybookError::fetch(format!("{url}: failed to read body: {e}")))?;

        check_body_size(parse_envelope(&bytes)?, max)
    }
}

/// Bound the decoded hypertext body, whatever the transfer encoding.
fn check_body_size(payload: FetchedPayload, max: u64) -> Result<FetchedPayload> {
    if payload.body.len() as u64 > max {
        return Err(PlaybookError::fetch(format!(
            "response too large: body of {} bytes exceeds {max} bytes",
            payload.body.len()
        )));
    }
    Ok(payload)
}

/// Validate the JSON envelope and pull out the content id and hypertext body.
fn parse_envelope(bytes: &[u8]) -> Result<FetchedPayload> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| PlaybookError::fetch(format!("invalid response envelope: {e}")))?;

    let content_id = envelope
        .content_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            PlaybookError::fetch("invalid response envelope: missing or empty content_id")
        })?;

    let body = envelope
        .details
        .and_then(|d| d.body)
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| {
            PlaybookError::fetch("invalid response envelope: missing or empty details.body")
        })?;

    Ok(FetchedPayload { body, content_id })
}

#[async_trait]
impl ContentSource for ApiClient {
    #[instrument(skip(self), fields(url = %self.opts.url))]
    async fn fetch(&self) -> Result<FetchedPayload> {
        let max_attempts = self.opts.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "fetching content");

            match self.attempt().await {
                Ok(payload) => {
                    info!(
                        attempt,
                        bytes = payload.body.len(),
                        content_id = %payload.content_id,
                        "fetched content"
                    );
                    return Ok(payload);
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.opts.delay_after(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(error = %e, attempts = attempt, "fetch failed after all attempts");
                    return Err(PlaybookError::FetchExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
            }
        }
    }
}
