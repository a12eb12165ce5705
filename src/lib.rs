//! Client for the OpenAI Assistants API.
//!
//! The interesting part is [`assistants::stream`]: a streamed run arrives as
//! a sequence of server-sent events carrying partial runs, run steps and
//! messages. [`assistants::stream::RunStream`] folds them into coherent
//! aggregates, hands every update to a [`assistants::stream::StreamObserver`]
//! in arrival order and returns the final [`assistants::runs::Run`].
//!
//! Enumerations and tagged unions on the wire go through [`codec`], which
//! tolerates the several shapes the API has used for the same value.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

pub mod assistants;
pub mod client;
pub mod codec;
mod error;
pub mod fine_tuning;
pub mod response_format;

pub use error::{Error, OpenAiError, Result};

#[doc(hidden)]
pub mod __private {
    pub use serde;
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

pub type ApiResponseOrError<T> = Result<T>;

/// Credentials shared by every client that is not given its own.
pub static DEFAULT_CREDENTIALS: RwLock<Credentials> = RwLock::new(Credentials {
    api_key: String::new(),
    base_url: String::new(),
});

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
    base_url: String,
}

impl Credentials {
    /// `base_url` is normalized to end with a slash so routes can be appended.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if base_url.is_empty() {
            base_url = DEFAULT_BASE_URL.to_owned();
        } else if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            api_key: api_key.into(),
            base_url,
        }
    }

    /// Reads `OPENAI_KEY` and, optionally, `OPENAI_BASE_URL`, loading a `.env`
    /// file first when one exists.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("OPENAI_KEY")
            .map_err(|_| crate::Error::Config("`OPENAI_KEY` is not set".to_owned()))?;
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_default();

        Ok(Self::new(api_key, base_url))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        if self.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.base_url
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url())
            .finish()
    }
}

/// Replaces the credentials used by [`client::OpenAiClient::from_default`].
pub fn set_default_credentials(credentials: Credentials) {
    *DEFAULT_CREDENTIALS
        .write()
        .unwrap_or_else(PoisonError::into_inner) = credentials;
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
