use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use transpipe::backend::{Backend, BackendError};
use transpipe::chunk::CharTokenCounter;
use transpipe::error::{Error, Result};
use transpipe::orchestrator::{failure_path, Orchestrator, Settings, Summary};
use transpipe::pipeline::cancel::CancelToken;

mod common;
use common::{
    fast_retry, ids, read_records, router_of, write_dataset, CountingBackend, MapBackend, SaturatedBackend,
    ScriptedBackend,
};

fn settings() -> Settings {
    Settings::new("English", "Korean").workers(4).retry(fast_retry())
}

async fn run_with(
    settings: Settings,
    backends: Vec<Arc<dyn Backend>>,
    input: &Path,
    output: &Path,
) -> Result<Summary> {
    Orchestrator::new(settings, router_of(backends), Arc::new(CharTokenCounter))
        .run(input, output, CancelToken::new(), CancelToken::new())
        .await
}

fn chat(i: usize) -> String {
    json!({
        "messages": [
            {"role": "user", "content": format!("question {i}")},
            {"role": "assistant", "content": format!("answer {i}")}
        ]
    })
    .to_string()
}

fn dataset(dir: &Path, n: usize) -> std::path::PathBuf {
    let lines: Vec<String> = (0..n).map(chat).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    write_dataset(dir, "in.jsonl", &refs)
}

#[tokio::test]
async fn echo_run_writes_every_record_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 20);
    let output = dir.path().join("out.jsonl");
    let backend = Arc::new(CountingBackend::new("echo"));

    let summary = run_with(settings(), vec![backend.clone()], &input, &output).await?;
    assert_eq!(
        summary,
        Summary {
            succeeded: 20,
            failed: 0,
            skipped: 0,
            last_index_read: Some(19),
        }
    );
    assert_eq!(backend.calls(), 40);

    let records = read_records(&output);
    let expected: Vec<String> = (0..20).map(|i| format!("{i:020}")).collect();
    assert_eq!(ids(&records), expected);
    for record in &records {
        for message in record["messages"].as_array().expect("messages") {
            assert_eq!(message["transformed_content"], message["content"]);
        }
    }
    assert!(read_records(&failure_path(&output)).is_empty());
    Ok(())
}

#[tokio::test]
async fn sharegpt_input_is_normalized_and_translated() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_dataset(
        dir.path(),
        "in.jsonl",
        &[r#"{"conversations":[{"from":"human","value":"hello"},{"from":"gpt","value":"hi"}],"source":"web"}"#],
    );
    let output = dir.path().join("out.jsonl");

    run_with(settings(), vec![Arc::new(MapBackend::upper())], &input, &output).await?;

    let records = read_records(&output);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["custom_id"], json!("00000000000000000000"));
    assert_eq!(record["source"], json!("web"));
    assert!(record.get("conversations").is_none());
    assert_eq!(
        record["messages"],
        json!([
            {"role": "user", "content": "hello", "transformed_content": "HELLO"},
            {"role": "assistant", "content": "hi", "transformed_content": "HI"}
        ])
    );
    Ok(())
}

#[tokio::test]
async fn saturated_backend_sends_everything_to_the_failure_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 3);
    let output = dir.path().join("out.jsonl");
    let backend = Arc::new(SaturatedBackend::new());

    let summary = run_with(settings(), vec![backend.clone()], &input, &output).await?;
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 3);
    // Three credits, each one call plus two capacity waits.
    assert_eq!(backend.calls(), 3 * 3 * 3);

    assert!(read_records(&output).is_empty());
    let failed = read_records(&failure_path(&output));
    assert_eq!(ids(&failed).len(), 3);
    for record in &failed {
        for message in record["messages"].as_array().expect("messages") {
            assert!(message.get("transformed_content").is_none());
        }
    }
    Ok(())
}

#[tokio::test]
async fn record_credits_cover_chunk_exhaustion() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_dataset(dir.path(), "in.jsonl", &[r#"{"messages":[{"role":"user","content":"x"}]}"#]);
    let output = dir.path().join("out.jsonl");
    // Two ordinary failures use up both chunk attempts of the first credit.
    let backend = Arc::new(ScriptedBackend::new(vec![
        BackendError::Request("reset".into()),
        BackendError::Request("reset".into()),
    ]));

    let summary = run_with(settings().workers(1), vec![backend.clone()], &input, &output).await?;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(backend.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn start_index_skips_earlier_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 5);
    let output = dir.path().join("out.jsonl");

    let summary = run_with(
        settings().start_index(2),
        vec![Arc::new(CountingBackend::new("echo"))],
        &input,
        &output,
    )
    .await?;
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.last_index_read, Some(4));
    assert_eq!(
        ids(&read_records(&output)),
        vec![
            "00000000000000000002".to_string(),
            "00000000000000000003".to_string(),
            "00000000000000000004".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn finished_messages_are_not_sent_again() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_dataset(
        dir.path(),
        "in.jsonl",
        &[
            r#"{"custom_id":"a","messages":[{"role":"user","content":"x","transformed_content":"done"}]}"#,
            r#"{"custom_id":"b","messages":[{"role":"user","content":"x","translated_content":"legacy"},{"role":"assistant","content":"y"}]}"#,
            r#"{"custom_id":"c","messages":[{"role":"user","content":""},{"role":"user"}]}"#,
        ],
    );
    let output = dir.path().join("out.jsonl");
    let backend = Arc::new(CountingBackend::new("echo"));

    let summary = run_with(settings(), vec![backend.clone()], &input, &output).await?;
    assert_eq!(summary.succeeded, 3);
    assert_eq!(backend.calls(), 1);

    let records = read_records(&output);
    let by_id = |id: &str| -> &Value {
        records
            .iter()
            .find(|r| r["custom_id"] == json!(id))
            .expect("record present")
    };
    assert_eq!(by_id("a")["messages"][0]["transformed_content"], json!("done"));
    assert_eq!(by_id("b")["messages"][0]["transformed_content"], json!("legacy"));
    assert!(by_id("b")["messages"][0].get("translated_content").is_none());
    assert_eq!(by_id("b")["messages"][1]["transformed_content"], json!("y"));
    assert_eq!(by_id("c")["messages"][0]["transformed_content"], json!(""));
    assert_eq!(by_id("c")["messages"][1]["transformed_content"], json!(""));
    Ok(())
}

#[tokio::test]
async fn empty_translations_are_redone_on_resume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_dataset(
        dir.path(),
        "in.jsonl",
        &[
            r#"{"custom_id":"a","messages":[{"role":"user","content":"Hello","transformed_content":""}]}"#,
            r#"{"custom_id":"b","messages":[{"role":"user","content":"","transformed_content":""}]}"#,
        ],
    );
    let output = dir.path().join("out.jsonl");
    let backend = Arc::new(MapBackend::upper());

    let summary = run_with(settings(), vec![backend], &input, &output).await?;
    assert_eq!(summary.succeeded, 2);

    let records = read_records(&output);
    let message = |id: &str| -> Value {
        records
            .iter()
            .find(|r| r["custom_id"] == json!(id))
            .expect("record present")["messages"][0]
            .clone()
    };
    assert_eq!(message("a")["transformed_content"], json!("HELLO"));
    assert_eq!(message("b")["transformed_content"], json!(""));
    Ok(())
}

#[tokio::test]
async fn malformed_lines_are_skipped_and_undecodable_records_fail() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let good = chat(0);
    let input = write_dataset(
        dir.path(),
        "in.jsonl",
        &[&good, "{not json", r#"{"messages":"not a list"}"#, &good],
    );
    let output = dir.path().join("out.jsonl");

    let summary = run_with(
        settings(),
        vec![Arc::new(CountingBackend::new("echo"))],
        &input,
        &output,
    )
    .await?;
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.last_index_read, Some(3));
    assert_eq!(
        ids(&read_records(&output)),
        vec!["00000000000000000000".to_string(), "00000000000000000003".to_string()]
    );

    let failed = read_records(&failure_path(&output));
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["custom_id"], json!("00000000000000000002"));
    assert_eq!(failed[0]["messages"], json!("not a list"));
    Ok(())
}

#[tokio::test]
async fn stop_before_run_reads_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 10);
    let output = dir.path().join("out.jsonl");
    let backend = Arc::new(CountingBackend::new("echo"));
    let stop = CancelToken::new();
    stop.cancel();

    let summary = Orchestrator::new(settings(), router_of(vec![backend.clone()]), Arc::new(CharTokenCounter))
        .run(&input, &output, stop, CancelToken::new())
        .await?;
    assert_eq!(summary, Summary::default());
    assert_eq!(backend.calls(), 0);
    assert!(output.exists());
    assert!(failure_path(&output).exists());
    Ok(())
}

#[tokio::test]
async fn calls_rotate_across_backends() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 10);
    let output = dir.path().join("out.jsonl");
    let a = Arc::new(CountingBackend::new("a"));
    let b = Arc::new(CountingBackend::new("b"));

    run_with(settings(), vec![a.clone(), b.clone()], &input, &output).await?;
    assert_eq!(a.calls(), 10);
    assert_eq!(b.calls(), 10);
    Ok(())
}

#[tokio::test]
async fn zero_budget_fails_before_reading() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dataset(dir.path(), 1);
    let output = dir.path().join("out.jsonl");

    let result = run_with(
        settings().budget(0),
        vec![Arc::new(CountingBackend::new("echo"))],
        &input,
        &output,
    )
    .await;
    assert!(matches!(result, Err(Error::InvalidBudget(0))));
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn missing_input_is_an_io_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let result = run_with(
        settings(),
        vec![Arc::new(CountingBackend::new("echo"))],
        &dir.path().join("absent.jsonl"),
        &dir.path().join("out.jsonl"),
    )
    .await;
    assert!(matches!(result, Err(Error::Io(_))));
    Ok(())
}

#[test]
fn failure_output_sits_next_to_the_success_output() {
    assert_eq!(
        failure_path(Path::new("/data/out.jsonl")),
        Path::new("/data/out.jsonl.failed")
    );
}
