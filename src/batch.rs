// Concurrent ingestion of documents from disk
use crate::db::Store;
use crate::error::IngestError;
use crate::ingest::IngestReport;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct BatchSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub sites_created: usize,
    pub sites_reused: usize,
}

impl BatchSummary {
    fn add(&mut self, report: &IngestReport) {
        self.accepted += 1;
        self.sites_created += report.sites_created;
        self.sites_reused += report.sites_reused;
    }
}

/// Ingest every file, at most `workers` at a time, each worker on its own
/// connection. A rejected document does not stop the batch; when `error_dir`
/// is given its body is kept there for inspection.
#[instrument(name = "ingest_files", skip_all, fields(files = paths.len()))]
pub async fn ingest_files(
    store: &Store,
    paths: Vec<PathBuf>,
    workers: usize,
    error_dir: Option<PathBuf>,
) -> anyhow::Result<BatchSummary> {
    if let Some(dir) = &error_dir {
        tokio::fs::create_dir_all(dir).await?;
    }
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let error_dir = Arc::new(error_dir);
    let mut tasks = JoinSet::new();

    for path in paths {
        let permit = permits.clone().acquire_owned().await?;
        let mut store = store.try_clone()?;
        let error_dir = error_dir.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let xml = match tokio::fs::read_to_string(&path).await {
                Ok(xml) => xml,
                Err(e) => {
                    error!("Unable to read {}: {e}", path.display());
                    return None;
                }
            };
            let (xml, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = store.ingest_xml(&xml);
                (xml, outcome)
            })
            .await
            .ok()?;
            match outcome {
                Ok(report) => Some(report),
                Err(reason) => {
                    warn!("Rejected {}: {reason}", path.display());
                    if let Some(dir) = error_dir.as_ref() {
                        keep_rejected(dir, &reason, &xml).await;
                    }
                    None
                }
            }
        });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Some(report) => summary.add(&report),
            None => summary.rejected += 1,
        }
    }
    info!(
        "accepted={} rejected={} sites_created={} sites_reused={}",
        summary.accepted, summary.rejected, summary.sites_created, summary.sites_reused
    );
    Ok(summary)
}

/// Write a rejected document to `<dir>/<timestamp>-<kind>-<nonce>.xml`.
async fn keep_rejected(dir: &Path, reason: &IngestError, xml: &str) {
    let nonce = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}-{}-{}.xml",
        Utc::now().format("%Y%m%dT%H%M%S%.6f"),
        reason.kind().as_str(),
        &nonce[..8]
    );
    let target = dir.join(name);
    if let Err(e) = tokio::fs::write(&target, xml).await {
        error!("Unable to keep rejected document at {}: {e}", target.display());
    }
}
