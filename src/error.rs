use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assistants::aggregate::ProtocolViolation;

/// An error body reported by the API, either in a failed response or as the
/// payload of an `error` stream event.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenAiError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl OpenAiError {
    pub fn new(message: String, error_type: String) -> OpenAiError {
        OpenAiError {
            message,
            error_type,
            param: None,
            code: None,
        }
    }
}

impl std::fmt::Display for OpenAiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for OpenAiError {}

#[derive(Debug, Error)]
pub enum Error {
    #[error("api error: {0}")]
    Api(#[from] OpenAiError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode `{event}` payload: {source}")]
    Decode {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error("invalid variant: {0}")]
    InvalidVariant(&'static str),
    #[error("stream observer failed: {0:#}")]
    Observer(anyhow::Error),
    #[error("stream ended before any run was observed")]
    NoRunObserved,
    #[error("stream cancelled before any run was observed")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error(transparent)]
    CannotCloneRequest(#[from] reqwest_eventsource::CannotCloneRequestError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
