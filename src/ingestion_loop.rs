//! Wires filesystem notifications and a periodic drain tick into the
//! readiness tracker, dispatching promoted study folders to the worker pool.

use crate::health::HealthState;
use crate::readiness::ReadinessTracker;
use crate::study_processor::StudyProcessor;
use crate::worker_pool::WorkerPool;
use camino::{Utf8Path, Utf8PathBuf};
use metrics::gauge;
use notify::{Event as NotifyEvent, RecommendedWatcher, RecursiveMode, Watcher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const DRAIN_PERIOD: Duration = Duration::from_secs(5);

/// Runs the ingestion loop until `shutdown` resolves: subscribes to
/// filesystem events under `inbox_root`, drains ready folders every
/// [DRAIN_PERIOD], and dispatches each to `processor` via a bounded worker
/// pool. Marks `health` ready once the watcher and ticker are both running.
pub async fn run(
    inbox_root: Utf8PathBuf,
    cooldown: Duration,
    processor: Arc<StudyProcessor>,
    max_concurrent: NonZeroUsize,
    health: HealthState,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let tracker = Arc::new(ReadinessTracker::new(inbox_root.clone(), cooldown));
    tracker.rescan(Instant::now()).await?;

    let (watcher, mut events) = watch(&inbox_root)?;
    let pool = WorkerPool::new(max_concurrent);
    let mut ticker = tokio::time::interval(DRAIN_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    health.mark_ready();
    tracing::info!(inbox = inbox_root.as_str(), "ingestion loop started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, draining workers");
                break;
            }
            Some(event) = events.recv() => {
                for path in event_paths(&event) {
                    tracker.note(&path).await;
                }
                gauge!(crate::metrics::PENDING_IMPORTS).set(tracker.pending_count().await as f64);
            }
            _ = ticker.tick() => {
                let ready = tracker.drain(Instant::now()).await;
                if !ready.is_empty() {
                    tracing::info!(count = ready.len(), "draining promoted study folders");
                }
                gauge!(crate::metrics::PENDING_IMPORTS).set(tracker.pending_count().await as f64);
                for study in ready {
                    if !study.folder.exists() {
                        continue;
                    }
                    let processor = Arc::clone(&processor);
                    pool.spawn(async move {
                        if let Err(e) = processor.process(&study.folder, &study.tenant).await {
                            tracing::error!(
                                tenant = study.tenant,
                                folder = study.folder.as_str(),
                                error = %e,
                                "failed to quarantine study after fatal error"
                            );
                        }
                    });
                }
            }
        }
    }

    drop(watcher);
    pool.drain(max_concurrent).await;
    Ok(())
}

fn watch(
    inbox_root: &Utf8Path,
) -> anyhow::Result<(RecommendedWatcher, UnboundedReceiver<NotifyEvent>)> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| match res
    {
        Ok(event) => {
            let _ = tx.send(event);
        }
        Err(e) => tracing::warn!(error = %e, "filesystem watcher error"),
    })?;
    watcher.watch(inbox_root.as_std_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

/// Extract every path an event names, so both its own path and any
/// associated rename/move target are forwarded to the readiness tracker.
fn event_paths(event: &NotifyEvent) -> Vec<Utf8PathBuf> {
    event
        .paths
        .iter()
        .filter_map(|p| Utf8PathBuf::from_path_buf(p.clone()).ok())
        .collect()
}
