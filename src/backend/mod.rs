//! Transformation backends and the router that spreads calls across them.
//!
//! A [`Backend`] turns one [`Request`] into one [`Response`]. Provider
//! integrations live outside this crate; the only built-in kind is
//! [`EchoBackend`], which returns its input unchanged.

pub mod limiter;
pub mod router;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// HTTP status codes that mean "try again later".
const CAPACITY_STATUS_CODES: &[&str] = &["429"];

/// Substrings that providers use to report quota or rate-limit rejections.
const CAPACITY_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "quota",
    "resource_exhausted",
    "resource exhausted",
    "overloaded",
    "too many requests",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("over capacity: {0}")]
    Capacity(String),

    #[error("malformed output: {0}")]
    Malformed(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl BackendError {
    pub fn is_capacity(&self) -> bool {
        match self {
            Self::Capacity(_) => true,
            Self::Request(message) => {
                let message = message.to_ascii_lowercase();
                CAPACITY_MARKERS.iter().any(|marker| message.contains(marker))
                    || CAPACITY_STATUS_CODES.iter().any(|code| mentions_status(&message, code))
            }
            Self::Malformed(_) => false,
        }
    }
}

/// `code` as a standalone number: not part of a longer number, an address,
/// or a port.
fn mentions_status(message: &str, code: &str) -> bool {
    message.match_indices(code).any(|(idx, _)| {
        let before = message[..idx].chars().next_back();
        let after = message[idx + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':'))
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// One call to a transformation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Instructions for the backend (system prompt).
    pub instruction: String,
    /// Text to transform.
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub text: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &Request) -> std::result::Result<Response, BackendError>;
}

/// Identity backend: answers every request with its input.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    name: String,
}

impl EchoBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl Backend for EchoBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &Request) -> std::result::Result<Response, BackendError> {
        Ok(Response {
            text: request.input.clone(),
        })
    }
}

/// Instantiate the backend described by one configuration entry.
pub fn build_backend(index: usize, def: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match def.provider.as_str() {
        "echo" => {
            let name = if def.model_id.is_empty() {
                format!("echo#{index}")
            } else {
                def.model_id.clone()
            };
            Ok(Arc::new(EchoBackend::new(name)))
        }
        other => Err(Error::config(format!(
            "backend #{index}: unsupported provider `{other}`"
        ))),
    }
}
