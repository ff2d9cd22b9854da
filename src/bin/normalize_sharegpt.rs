//! Rewrite a ShareGPT-style dataset into the canonical `messages` /
//! `role` / `content` schema.
//!
//! ```bash
//! normalize_sharegpt data.jsonl   # writes data.normalized.jsonl
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transpipe::error::Error;
use transpipe::normalize::normalize_document;
use transpipe::store::{Reader, RecordWriter};

#[derive(Parser, Debug)]
#[command(name = "normalize_sharegpt")]
#[command(about = "Canonicalize the schema of an NDJSON chat dataset")]
struct Cli {
    /// Input dataset (.jsonl)
    input: PathBuf,
}

fn output_path(input: &Path) -> PathBuf {
    let name = input.to_string_lossy();
    let stem = name.strip_suffix(".jsonl").unwrap_or(name.as_ref());
    PathBuf::from(format!("{stem}.normalized.jsonl"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("transpipe=info,normalize_sharegpt=info")),
        )
        .init();

    let cli = Cli::parse();
    let output = output_path(&cli.input);

    let mut reader = Reader::open(&cli.input).with_context(|| format!("cannot open {}", cli.input.display()))?;
    let mut writer = RecordWriter::create(&output)
        .await
        .with_context(|| format!("cannot create {}", output.display()))?;

    let mut changed = 0u64;
    let mut skipped = 0u64;
    loop {
        let parsed = match reader.scan() {
            Ok(None) => break,
            Ok(Some(line)) => line.to_document(),
            Err(err) => Err(err),
        };
        let mut doc = match parsed {
            Ok(doc) => doc,
            Err(Error::MalformedRecord { offset, message }) => {
                warn!(offset, error = %message, "skipping malformed line");
                skipped += 1;
                continue;
            }
            Err(err) => return Err(err).context("read failed"),
        };
        if normalize_document(&mut doc) {
            changed += 1;
        }
        writer.write(&doc).await.context("write failed")?;
    }
    writer.close().await.context("flush failed")?;

    info!(
        records = writer.records(),
        changed,
        skipped,
        output = %output.display(),
        "normalized"
    );
    Ok(())
}
