use std::sync::Arc;
use std::time::Duration;

use transpipe::backend::limiter::RateLimiter;
use transpipe::backend::router::{BackendHandle, BackendRouter};
use transpipe::backend::{Backend, BackendError, Request};
use transpipe::config::BackendConfig;
use transpipe::error::{Error, Result};
use transpipe::pipeline::cancel::CancelToken;

mod common;
use common::{CountingBackend, SaturatedBackend};

fn request(text: &str) -> Request {
    Request {
        instruction: "translate".into(),
        input: text.into(),
    }
}

#[tokio::test]
async fn round_robin_is_fair() -> Result<()> {
    let backends: Vec<Arc<CountingBackend>> = (0..3)
        .map(|i| Arc::new(CountingBackend::new(format!("b{i}"))))
        .collect();
    let router = Arc::new(BackendRouter::new(
        backends
            .iter()
            .map(|b| BackendHandle::new(b.clone() as Arc<dyn Backend>))
            .collect(),
    )?);
    let cancel = CancelToken::new();

    let mut tasks = Vec::new();
    for i in 0..100 {
        let router = router.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            router.dispatch(&request(&format!("r{i}")), &cancel).await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let calls: Vec<usize> = backends.iter().map(|b| b.calls()).collect();
    assert_eq!(calls.iter().sum::<usize>(), 100);
    assert!(calls.iter().all(|&c| c == 33 || c == 34), "{calls:?}");
    let handle_calls: Vec<u64> = router.handles().iter().map(|h| h.calls()).collect();
    assert_eq!(handle_calls.iter().sum::<u64>(), 100);
    Ok(())
}

#[tokio::test]
async fn requests_are_forwarded_verbatim() -> Result<()> {
    let backend = Arc::new(CountingBackend::new("echo"));
    let router = BackendRouter::new(vec![BackendHandle::new(backend.clone())])?;
    let response = router.dispatch(&request("  keep\n spacing "), &CancelToken::new()).await?;
    assert_eq!(response.text, "  keep\n spacing ");
    Ok(())
}

#[test]
fn empty_router_is_a_config_error() {
    assert!(matches!(BackendRouter::new(Vec::new()), Err(Error::Config(_))));
}

#[test]
fn unknown_provider_is_rejected() {
    let defs = vec![BackendConfig {
        provider: "carrier-pigeon".into(),
        ..BackendConfig::default()
    }];
    assert!(matches!(BackendRouter::from_config(&defs), Err(Error::Config(_))));
}

#[tokio::test]
async fn backend_errors_carry_the_backend_name() -> Result<()> {
    let router = BackendRouter::new(vec![BackendHandle::new(Arc::new(SaturatedBackend::new()))])?;
    let err = router
        .dispatch(&request("x"), &CancelToken::new())
        .await
        .expect_err("saturated");
    match &err {
        Error::Backend { backend, source } => {
            assert_eq!(backend, "saturated");
            assert!(matches!(source, BackendError::Capacity(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_capacity());
    Ok(())
}

#[test]
fn request_errors_are_classified_by_message() {
    assert!(BackendError::Request("HTTP 429: Resource has been exhausted".into()).is_capacity());
    assert!(BackendError::Request("RESOURCE_EXHAUSTED".into()).is_capacity());
    assert!(!BackendError::Request("connection reset by peer".into()).is_capacity());
    assert!(BackendError::Request("status=429 Too Many".into()).is_capacity());
    assert!(BackendError::Request("got HTTP 429.".into()).is_capacity());
    assert!(!BackendError::Request("connect to 10.0.0.1:14290 refused".into()).is_capacity());
    assert!(!BackendError::Request("dial tcp 10.0.0.1:429: refused".into()).is_capacity());
    assert!(!BackendError::Request("request id 84291 failed".into()).is_capacity());
    assert!(!BackendError::Malformed("quota".into()).is_capacity());
}

#[tokio::test(start_paused = true)]
async fn limiter_spaces_calls_at_the_configured_rate() -> Result<()> {
    let backend = Arc::new(CountingBackend::new("slow"));
    let router = Arc::new(BackendRouter::new(vec![
        BackendHandle::new(backend.clone()).with_limiter(RateLimiter::new(2.0)?)
    ])?);
    let cancel = CancelToken::new();

    // The bucket starts with one token.
    router.dispatch(&request("a"), &cancel).await?;
    assert_eq!(backend.calls(), 1);

    let task = {
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { router.dispatch(&request("b"), &cancel).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(backend.calls(), 1);

    tokio::time::advance(Duration::from_millis(499)).await;
    tokio::task::yield_now().await;
    assert_eq!(backend.calls(), 1, "token must not be available before 500ms");

    tokio::time::advance(Duration::from_millis(1)).await;
    task.await??;
    assert_eq!(backend.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_unblocks_limiter_wait() -> Result<()> {
    let backend = Arc::new(CountingBackend::new("slow"));
    let router = Arc::new(BackendRouter::new(vec![
        BackendHandle::new(backend.clone()).with_limiter(RateLimiter::new(0.01)?)
    ])?);
    let cancel = CancelToken::new();
    router.dispatch(&request("a"), &cancel).await?;

    let task = {
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { router.dispatch(&request("b"), &cancel).await })
    };
    tokio::task::yield_now().await;
    cancel.cancel();

    let result = task.await?;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(backend.calls(), 1);
    Ok(())
}

#[test]
fn limiter_rejects_invalid_rates() {
    assert!(RateLimiter::new(0.0).is_err());
    assert!(RateLimiter::new(-1.0).is_err());
    assert!(RateLimiter::new(f64::NAN).is_err());
}

#[tokio::test(start_paused = true)]
async fn burst_allows_back_to_back_calls() -> Result<()> {
    let limiter = RateLimiter::new(1.0)?.with_burst(3);
    for _ in 0..3 {
        assert!(limiter.try_acquire().is_ok());
    }
    let wait = limiter.try_acquire().expect_err("bucket empty");
    assert!(wait <= Duration::from_secs(1) && wait > Duration::from_millis(900));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_bucket() -> Result<()> {
    const CALLERS: usize = 10;
    let backend = Arc::new(CountingBackend::new("shared"));
    let router = Arc::new(BackendRouter::new(vec![
        BackendHandle::new(backend.clone()).with_limiter(RateLimiter::new(4.0)?.with_burst(2))
    ])?);
    let cancel = CancelToken::new();
    let started = tokio::time::Instant::now();

    let tasks: Vec<_> = (0..CALLERS)
        .map(|i| {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.dispatch(&request(&format!("r{i}")), &cancel).await })
        })
        .collect();

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(backend.calls(), 2, "only the burst goes through at once");

    // One second at 4 calls per second: at most 2 + 4 calls.
    for _ in 0..20 {
        tokio::time::advance(Duration::from_millis(50)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(backend.calls() <= 2 + 4, "{} calls", backend.calls());
    }
    assert!(backend.calls() > 2);

    for task in tasks {
        task.await??;
    }
    assert_eq!(backend.calls(), CALLERS);
    assert!(started.elapsed() >= Duration::from_millis(1_900));
    Ok(())
}
