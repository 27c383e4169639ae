// src/main.rs

use anyhow::{bail, Context, Result};
use chunkwise::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000/";

const USAGE: &str = "usage:
  chunkwise upload <path>...
  chunkwise download <name> [dir] [--whole]
  chunkwise list

The server is read from CHUNKWISE_SERVER (default http://127.0.0.1:8000/).";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = std::env::var("CHUNKWISE_SERVER").unwrap_or_else(|_| DEFAULT_SERVER.to_string());
    let endpoint = Endpoint::parse(&server)?;
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();

    let client = TransferClient::connect(endpoint).await?;
    match command.as_str() {
        "upload" if !rest.is_empty() => upload(client, rest).await,
        "download" if !rest.is_empty() => download(client, rest).await,
        "list" => {
            for name in client.list_files().await? {
                println!("{name}");
            }
            Ok(())
        }
        _ => bail!("{USAGE}"),
    }
}

/// Uploads every path concurrently, each in its own session.
async fn upload(client: TransferClient, paths: Vec<String>) -> Result<()> {
    let mut handles = Vec::with_capacity(paths.len());
    for path in paths {
        let source = FileSource::open(&path)
            .await
            .with_context(|| format!("cannot read {path}"))?;
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let (reporter, rx) = ProgressReporter::channel();
            let name = source.name().to_string();
            let display = tokio::spawn(report_progress(name.clone(), rx));
            let outcome = client.upload(Arc::new(source), reporter).await;
            if let Err(e) = display.await {
                tracing::warn!(file = %name, error = %e, "progress display task failed");
            }
            (name, outcome)
        }));
    }

    let mut failures = 0;
    for handle in handles {
        let (name, outcome) = handle.await?;
        if let TransferOutcome::Failed(e) = outcome {
            if let Some(message) = e.user_message(Direction::Upload) {
                eprintln!("{name}: {message} ({e})");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} upload(s) failed");
    }
    Ok(())
}

async fn download(client: TransferClient, args: Vec<String>) -> Result<()> {
    let whole = args.iter().any(|a| a == "--whole");
    let mut positional = args.into_iter().filter(|a| a != "--whole");
    let Some(name) = positional.next() else {
        bail!("{USAGE}");
    };
    let dir = positional.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    let mut provider = DirectorySinkProvider::new(dir);
    if whole {
        provider = provider.without_positional_writes();
    }

    let (reporter, rx) = ProgressReporter::channel();
    let display = tokio::spawn(report_progress(name.clone(), rx));
    let outcome = client.download(&name, &provider, reporter).await;
    display.await.context("progress display task failed")?;

    match outcome {
        TransferOutcome::Success => Ok(()),
        TransferOutcome::Failed(e) if e.is_missing() => {
            bail!("file not found: \"{name}\" may have been deleted; run `chunkwise list` to refresh")
        }
        TransferOutcome::Failed(e) => match e.user_message(Direction::Download) {
            Some(message) => bail!("{message} ({e})"),
            None => Ok(()),
        },
    }
}

async fn report_progress(name: String, rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut last_logged = -10.0;
    ProgressAggregator::new()
        .drive(rx, |signal| match signal {
            ProgressSignal::Indeterminate => tracing::info!(file = %name, "transferring"),
            ProgressSignal::Determinate(percent) if percent - last_logged >= 10.0 || percent >= 100.0 => {
                last_logged = percent;
                tracing::info!(file = %name, "{percent:.1}%");
            }
            ProgressSignal::Determinate(_) => {}
            ProgressSignal::Failed => tracing::info!(file = %name, "failed"),
            ProgressSignal::Completed => tracing::info!(file = %name, "done"),
        })
        .await;
}
