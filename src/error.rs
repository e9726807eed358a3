//! Error taxonomy shared by the gateway, the registry and the lifecycle controller.
//!
//! Every backend failure is normalized into [`ClientError`] at the gateway boundary so
//! callers never inspect HTTP status codes or transport details directly.

use thiserror::Error;

const GENERIC_DETAIL: &str = "the analysis service returned an error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Bad input, caught before any network call (or rejected by the backend as malformed).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Connectivity failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend-side failure (5xx, undecodable body, reported tool failure).
    #[error("server error: {detail}")]
    Server { status: Option<u16>, detail: String },

    /// Unknown job or report id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted against a job that is not in the required state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Local persistence of a downloaded artifact failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Only transport failures are retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// Map a non-success HTTP status and optional `detail` into the taxonomy.
    pub fn from_status(status: u16, detail: Option<String>) -> Self {
        let detail = detail
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| GENERIC_DETAIL.to_string());
        match status {
            400 | 422 => ClientError::Validation(detail),
            404 => ClientError::NotFound(detail),
            409 => ClientError::InvalidState(detail),
            _ => ClientError::Server {
                status: Some(status),
                detail,
            },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ClientError::from_status(status.as_u16(), None);
        }
        if e.is_decode() {
            return ClientError::Server {
                status: None,
                detail: format!("malformed response: {e}"),
            };
        }
        if e.is_builder() {
            return ClientError::Validation(e.to_string());
        }
        ClientError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}
