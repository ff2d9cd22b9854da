#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use transpipe::backend::router::{BackendHandle, BackendRouter};
use transpipe::backend::{Backend, BackendError, Request, Response};
use transpipe::config::RetryConfig;
use transpipe::error::{Error, Result};

/// Sentinel markers are `[` + 16 hex digits + `]`.
pub const MARKER_LEN: usize = 18;

/// Echoes its input and counts calls.
pub struct CountingBackend {
    name: String,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for CountingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &Request) -> std::result::Result<Response, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response {
            text: request.input.clone(),
        })
    }
}

/// Applies a function to the text between the sentinels and wraps the result
/// in some chatter, like a real model would.
pub struct MapBackend {
    map: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl MapBackend {
    pub fn new(map: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self { map: Box::new(map) }
    }

    pub fn upper() -> Self {
        Self::new(|text| text.to_uppercase())
    }
}

#[async_trait]
impl Backend for MapBackend {
    fn name(&self) -> &str {
        "map"
    }

    async fn generate(&self, request: &Request) -> std::result::Result<Response, BackendError> {
        let input = &request.input;
        let (start, rest) = input.split_at(MARKER_LEN);
        let (body, end) = rest.split_at(rest.len() - MARKER_LEN);
        Ok(Response {
            text: format!("Sure, here it is:\n{start}{}{end}\nHope that helps.", (self.map)(body)),
        })
    }
}

/// Plays back scripted failures, then echoes.
pub struct ScriptedBackend {
    script: Mutex<Vec<BackendError>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Errors are returned in the order given.
    pub fn new(mut errors: Vec<BackendError>) -> Self {
        errors.reverse();
        Self {
            script: Mutex::new(errors),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &Request) -> std::result::Result<Response, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().expect("mutex poisoned").pop() {
            Some(err) => Err(err),
            None => Ok(Response {
                text: request.input.clone(),
            }),
        }
    }
}

/// Always over capacity.
pub struct SaturatedBackend {
    calls: AtomicUsize,
}

impl SaturatedBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for SaturatedBackend {
    fn name(&self) -> &str {
        "saturated"
    }

    async fn generate(&self, _request: &Request) -> std::result::Result<Response, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Capacity("429 Too Many Requests".into()))
    }
}

/// Answers without the sentinels.
pub struct ChattyBackend;

#[async_trait]
impl Backend for ChattyBackend {
    fn name(&self) -> &str {
        "chatty"
    }

    async fn generate(&self, _request: &Request) -> std::result::Result<Response, BackendError> {
        Ok(Response {
            text: "I would be happy to translate that for you!".into(),
        })
    }
}

pub fn router_of(backends: Vec<Arc<dyn Backend>>) -> Arc<BackendRouter> {
    let handles = backends.into_iter().map(BackendHandle::new).collect();
    Arc::new(BackendRouter::new(handles).expect("router"))
}

/// No sleeping anywhere; two chunk attempts, two capacity waits, three credits.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        chunk_attempts: 2,
        capacity_waits: 2,
        record_credits: 3,
        ..RetryConfig::default()
    }
    .immediate()
}

pub fn write_dataset(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = lines.join("\n");
    body.push('\n');
    std::fs::write(&path, body).expect("write dataset");
    path
}

pub fn read_records(path: &Path) -> Vec<Value> {
    let data = std::fs::read_to_string(path).expect("read output");
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("valid json line"))
        .collect()
}

pub fn ids(records: &[Value]) -> Vec<String> {
    let mut ids: Vec<String> = records
        .iter()
        .map(|r| r["custom_id"].as_str().expect("custom_id").to_string())
        .collect();
    ids.sort();
    ids
}

pub fn capacity_error() -> Error {
    Error::Backend {
        backend: "b".into(),
        source: BackendError::Capacity("quota".into()),
    }
}

pub fn request_error() -> Error {
    Error::Backend {
        backend: "b".into(),
        source: BackendError::Request("connection reset".into()),
    }
}

pub fn ok<T>(value: T) -> Result<T> {
    Ok(value)
}
