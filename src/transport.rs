use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use std::fmt;
use std::io::Read;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::payload::RequestPayload;
use crate::util::parse_retry_after;

/// Response whose body has not been read yet.
pub struct TransportResponse {
    pub status: StatusCode,
    /// Parsed `Retry-After` header, if the server sent one in seconds.
    pub retry_after: Option<Duration>,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection-level failure before any response arrived (connect error, timeout, reset).
    #[error("{0}")]
    Transient(String),
    /// The request could not be built or sent at all.
    #[error("{0}")]
    Fatal(String),
}

/// Sends one form-encoded POST and hands back the unread response.
///
/// Implementations must not retry; [`crate::Client`] owns the retry policy.
pub trait Transport: Send + Sync {
    fn post_form(
        &self,
        url: &str,
        payload: &RequestPayload,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("enatrieve/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("enatrieve")),
        );

        // No total timeout by default: bodies can be far larger than what fits in one.
        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.timeout);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl Transport for HttpTransport {
    fn post_form(
        &self,
        url: &str,
        payload: &RequestPayload,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let resp = self
            .http
            .post(url)
            .form(payload)
            .send()
            .map_err(classify_error)?;

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        Ok(TransportResponse {
            status: resp.status(),
            retry_after,
            body: Box::new(resp),
        })
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_builder() || err.is_redirect() {
        TransportError::Fatal(err.to_string())
    } else {
        // connect errors, timeouts and resets before the status line
        TransportError::Transient(err.to_string())
    }
}
