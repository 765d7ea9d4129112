//! `tabload import`: run one bulk import in-process and report the result.

use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use tabload_core::Config;

use crate::bulk::{JobStatus, Upload};
use crate::startup;

pub async fn import_file(mut config: Config, path: &Path, batch_size: Option<usize>) -> anyhow::Result<()> {
    if let Some(size) = batch_size {
        config.bulk.batch_size = size.max(1);
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let store = startup::build_store(&config).await;
    let runner = startup::build_runner(&config, store)?;

    let mut updates = runner.registry().subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => info!(
                    job_id = %update.id,
                    status = update.status.as_str(),
                    progress = update.progress,
                    "import progress"
                ),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let view = runner
        .run_to_completion(Upload {
            file_name,
            bytes: Bytes::from(bytes),
        })
        .await?;
    progress.abort();

    let job = view.found().context("import job missing from registry")?;
    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status == JobStatus::Failed {
        anyhow::bail!("import failed: {}", job.error.unwrap_or_default());
    }
    Ok(())
}
