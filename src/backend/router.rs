use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::limiter::RateLimiter;
use crate::backend::{build_backend, Backend, Request, Response};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::pipeline::cancel::CancelToken;

/// A backend plus its own rate limiter.
pub struct BackendHandle {
    backend: Arc<dyn Backend>,
    limiter: Option<RateLimiter>,
    calls: AtomicU64,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            limiter: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn from_config(index: usize, def: &BackendConfig) -> Result<Self> {
        let mut handle = Self::new(build_backend(index, def)?);
        if let Some(rate) = def.rate_limit {
            let mut limiter = RateLimiter::new(rate)?;
            if let Some(burst) = def.burst {
                limiter = limiter.with_burst(burst);
            }
            handle = handle.with_limiter(limiter);
        }
        Ok(handle)
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Number of requests forwarded to this backend so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("name", &self.name())
            .field("rate", &self.limiter.as_ref().map(RateLimiter::rate))
            .field("calls", &self.calls())
            .finish()
    }
}

/// Round-robin dispatcher over a fixed set of backends.
///
/// Selection is a plain rotating counter: C calls over N handles give every
/// handle either floor(C/N) or ceil(C/N) of them, regardless of latency.
#[derive(Debug)]
pub struct BackendRouter {
    handles: Vec<BackendHandle>,
    next: AtomicUsize,
}

impl BackendRouter {
    pub fn new(handles: Vec<BackendHandle>) -> Result<Self> {
        if handles.is_empty() {
            return Err(Error::config("at least one backend is required"));
        }
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
        })
    }

    pub fn from_config(defs: &[BackendConfig]) -> Result<Self> {
        let handles = defs
            .iter()
            .enumerate()
            .map(|(index, def)| BackendHandle::from_config(index, def))
            .collect::<Result<Vec<_>>>()?;
        Self::new(handles)
    }

    pub fn handles(&self) -> &[BackendHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn select(&self) -> &BackendHandle {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[idx]
    }

    /// Forward `request` to the next backend in rotation, waiting on its rate
    /// limiter first.
    pub async fn dispatch(&self, request: &Request, cancel: &CancelToken) -> Result<Response> {
        let handle = self.select();
        if let Some(limiter) = &handle.limiter {
            limiter.acquire(cancel).await?;
        }
        handle.calls.fetch_add(1, Ordering::Relaxed);

        tracing::event!(
            tracing::Level::TRACE,
            event = "transpipe.backend.call",
            backend = handle.name(),
            input_bytes = request.input.len(),
            "transpipe.backend.call"
        );

        handle
            .backend
            .generate(request)
            .await
            .map_err(|source| Error::Backend {
                backend: handle.name().to_string(),
                source,
            })
    }
}
