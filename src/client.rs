use anyhow::Result as AnyResult;
use reqwest::StatusCode;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::load_config;
use crate::error::{Error, Result, format_portal_error};
use crate::payload::RequestPayload;
use crate::transport::{HttpTransport, Transport, TransportError, TransportResponse};
use crate::util::{DEFAULT_RETRY_STATUSES, backoff};

/// Public ENA Portal search endpoint.
pub const DEFAULT_URL: &str = "https://www.ebi.ac.uk/ena/portal/api/search";

const ERROR_BODY_LIMIT: u64 = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Search endpoint URL, typically [`DEFAULT_URL`].
    pub url: String,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Optional limit on the whole request, body included. `None` means no limit.
    pub timeout: Option<Duration>,
    /// Whether to verify TLS certificates.
    pub verify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(30),
            timeout: None,
            verify: true,
        }
    }
}

/// Bounded retry with exponential backoff.
///
/// The delay before retry `n` (0-based) is `backoff_factor * 2^n`, so the defaults wait
/// 0.5s, 1s, 2s, 4s and 8s.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub total: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    /// Status codes that are retried. Anything else that is not a success is terminal.
    pub retry_statuses: Vec<u16>,
    /// Use the server's `Retry-After` instead of the computed delay when present.
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 5,
            backoff_factor: Duration::from_millis(500),
            backoff_max: Duration::from_secs(120),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(d) if self.respect_retry_after => d.min(self.backoff_max),
            _ => backoff(self.backoff_factor, retry, self.backoff_max),
        }
    }
}

/// A successful response whose body is still unread.
pub struct FetchResponse {
    pub status: StatusCode,
    /// Number of retries it took to get here.
    pub retries: u32,
    body: Box<dyn Read + Send>,
}

impl FetchResponse {
    pub fn into_body(self) -> Box<dyn Read + Send> {
        self.body
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Clone)]
pub struct Client {
    url: String,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    sleeper: Sleeper,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client using environment variables and/or `.enatrieverc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> AnyResult<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit arguments
    /// - environment variables `ENATRIEVE_URL` / `ENATRIEVE_TIMEOUT` / `ENATRIEVE_VERIFY`
    /// - config file from `ENATRIEVE_RC` or `.enatrieverc`
    /// - built-in defaults
    pub fn new(
        url: Option<String>,
        timeout: Option<Duration>,
        verify: Option<bool>,
    ) -> AnyResult<Self> {
        let cfg = load_config(url, timeout, verify)?;
        Self::from_config(&cfg)
    }

    pub fn from_config(cfg: &ClientConfig) -> AnyResult<Self> {
        let transport = HttpTransport::new(cfg)?;
        Ok(Self::with_transport(cfg.url.clone(), Arc::new(transport)))
    }

    /// Creates a client around any [`Transport`], with the default retry policy.
    pub fn with_transport(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.into(),
            retry: RetryPolicy::default(),
            transport,
            sleeper: Arc::new(thread::sleep),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the function used to wait between retries.
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// POSTs the payload and returns the response with its body unread.
    ///
    /// Retries cover only getting a response; once the body is handed out, failures are
    /// the caller's to report.
    pub fn fetch(&self, payload: &RequestPayload) -> Result<FetchResponse> {
        info!(
            url = %self.url,
            query = payload.query(),
            format = %payload.format(),
            limit = payload.limit(),
            "sending query to ENA portal"
        );

        let mut retries = 0u32;
        loop {
            let (last, retry_after) = match self.transport.post_form(&self.url, payload) {
                Ok(resp) if resp.status.is_success() => {
                    debug!(status = %resp.status, retries, "response headers received");
                    return Ok(FetchResponse {
                        status: resp.status,
                        retries,
                        body: resp.body,
                    });
                }
                Ok(resp) if self.retry.is_retryable(resp.status) => {
                    (format!("HTTP {}", resp.status), resp.retry_after)
                }
                Ok(resp) => return Err(self.status_error(resp)),
                Err(TransportError::Transient(msg)) => (msg, None),
                Err(TransportError::Fatal(msg)) => {
                    error!("request failed: {}", msg);
                    return Err(Error::Transport(msg));
                }
            };

            if retries >= self.retry.total {
                error!(retries, "retry budget spent, last failure: {}", last);
                return Err(Error::RetriesExhausted { retries, last });
            }

            let delay = self.retry.delay(retries, retry_after);
            warn!(
                retry = retries + 1,
                of = self.retry.total,
                delay_ms = delay.as_millis() as u64,
                "transient failure: {}",
                last
            );
            (self.sleeper)(delay);
            retries += 1;
        }
    }

    fn status_error(&self, resp: TransportResponse) -> Error {
        let mut raw = Vec::new();
        // The error body is only for diagnostics; a failed read just leaves it empty.
        let _ = resp.body.take(ERROR_BODY_LIMIT).read_to_end(&mut raw);
        let text = String::from_utf8_lossy(&raw);
        error!("HTTP error {}: {}", resp.status, text.trim());
        format_portal_error(resp.status, &self.url, &text)
    }
}
