use reqwest::StatusCode;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failures of a single retrieval.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or conflicting options; raised before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request could not be sent and the failure is not worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// The portal answered with a non-success status outside the retry set.
    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// Every retry was spent on transient failures.
    #[error("giving up after {retries} retries: {last}")]
    RetriesExhausted { retries: u32, last: String },

    /// The response body failed after streaming began. Bytes already written stay in the sink.
    #[error("transfer interrupted: {0}")]
    Stream(#[source] io::Error),

    /// Writing to the output sink failed.
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification used to pick the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Stream,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Transport(_) | Error::Status { .. } | Error::RetriesExhausted { .. } => {
                ErrorKind::Transport
            }
            Error::Stream(_) => ErrorKind::Stream,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Config => 2,
            ErrorKind::Transport => 3,
            ErrorKind::Stream => 4,
            ErrorKind::Io => 5,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct PortalErrorResponse {
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) path: Option<String>,
}

/// Turns an error body from the portal into a [`Error::Status`].
///
/// The portal usually answers with a small JSON document; anything else is kept as trimmed text.
pub(crate) fn format_portal_error(status: StatusCode, url: &str, body: &str) -> Error {
    let message = match serde_json::from_str::<PortalErrorResponse>(body) {
        Ok(e) => {
            let title = e.error.as_deref().unwrap_or("");
            let detail = e.message.as_deref().unwrap_or("");
            let path = e.path.as_deref().unwrap_or(url);
            let status_in_body = e.status.unwrap_or(status.as_u16());

            if status == StatusCode::BAD_REQUEST {
                format!(
                    "the portal rejected the query (HTTP {}).\n- Check the taxonomy id and library strategy values\n\nServer message: {} {}\nrequest: {}",
                    status_in_body, title, detail, path
                )
            } else {
                format!("{} {} (request: {})", title, detail, path)
                    .trim()
                    .to_string()
            }
        }
        Err(_) => {
            let text = body.trim();
            if text.is_empty() {
                format!(
                    "{} (request: {})",
                    status.canonical_reason().unwrap_or("request failed"),
                    url
                )
            } else {
                format!("{} (request: {})", text, url)
            }
        }
    };

    Error::Status { status, message }
}
