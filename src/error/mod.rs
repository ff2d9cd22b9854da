use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("pipeline error: {context}")]
    Pipeline { context: &'static str },

    #[error("stage `{stage}` exhausted {attempts} attempts: {source}")]
    RetryExhausted {
        stage: &'static str,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("backend `{backend}` failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("malformed record at byte {offset}: {message}")]
    MalformedRecord { offset: usize, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("token counter unavailable: {0}")]
    TokenCounter(String),

    #[error("chunk budget must be positive, got {0}")]
    InvalidBudget(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn pipeline(context: &'static str) -> Self {
        Self::Pipeline { context }
    }

    pub fn retry_exhausted(stage: &'static str, attempts: u32, source: Error) -> Self {
        Self::RetryExhausted {
            stage,
            attempts,
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error (or the error it wraps) reports an exhausted or
    /// rate-limited backend.
    pub fn is_capacity(&self) -> bool {
        match self {
            Self::Backend { source, .. } => source.is_capacity(),
            Self::RetryExhausted { source, .. } => source.is_capacity(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::RetryExhausted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
