//! Debounces filesystem events into "ready" study folders.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A study folder promoted by [ReadinessTracker::drain], paired with the
/// tenant it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyStudy {
    pub folder: Utf8PathBuf,
    pub tenant: String,
}

/// Tracks the most recent filesystem activity under each study folder and
/// promotes folders that have been quiet for at least `cooldown`.
pub struct ReadinessTracker {
    inbox_root: Utf8PathBuf,
    cooldown: Duration,
    pending: Mutex<HashMap<Utf8PathBuf, Instant>>,
}

impl ReadinessTracker {
    pub fn new(inbox_root: Utf8PathBuf, cooldown: Duration) -> Self {
        Self {
            inbox_root,
            cooldown,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record activity at `path`, refreshing (or creating) the pending entry
    /// for its enclosing study folder. Paths with fewer than two segments
    /// below the inbox root (a tenant directory alone) are ignored.
    pub async fn note(&self, path: &Utf8Path) {
        let Some(key) = self.study_key(path) else {
            return;
        };
        self.pending.lock().await.insert(key, Instant::now());
    }

    /// Stamp `path` as pending at a specific instant, used by the startup
    /// rescan to seed every existing study folder with the same timestamp.
    async fn note_at(&self, path: &Utf8Path, when: Instant) {
        let Some(key) = self.study_key(path) else {
            return;
        };
        self.pending.lock().await.insert(key, when);
    }

    /// Remove and return every pending entry that has been quiet for at
    /// least `cooldown`, paired with the tenant parsed from its key.
    pub async fn drain(&self, now: Instant) -> Vec<ReadyStudy> {
        let mut pending = self.pending.lock().await;
        let ready_keys: Vec<Utf8PathBuf> = pending
            .iter()
            .filter(|(_, &last_activity)| {
                now.saturating_duration_since(last_activity) >= self.cooldown
            })
            .map(|(key, _)| key.clone())
            .collect();

        ready_keys
            .into_iter()
            .filter_map(|key| {
                pending.remove(&key);
                let tenant = key
                    .strip_prefix(&self.inbox_root)
                    .ok()?
                    .components()
                    .next()?
                    .as_str()
                    .to_string();
                Some(ReadyStudy { folder: key, tenant })
            })
            .collect()
    }

    /// Number of folders currently pending promotion.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Enumerate existing `{inbox}/{tenant}/{study}` directories and stamp
    /// them all as pending at `startup_time`, so the first drain happens one
    /// full cooldown after startup rather than immediately.
    pub async fn rescan(&self, startup_time: Instant) -> std::io::Result<()> {
        for tenant_entry in fs_err::read_dir(&self.inbox_root)? {
            let tenant_entry = tenant_entry?;
            if !tenant_entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(tenant_path) = Utf8PathBuf::from_path_buf(tenant_entry.path()) else {
                tracing::warn!(
                    path = %tenant_entry.path().display(),
                    "skipping non-UTF-8 tenant directory during startup rescan"
                );
                continue;
            };
            for study_entry in fs_err::read_dir(&tenant_path)? {
                let study_entry = study_entry?;
                if !study_entry.file_type()?.is_dir() {
                    continue;
                }
                let Ok(study_path) = Utf8PathBuf::from_path_buf(study_entry.path()) else {
                    tracing::warn!(
                        path = %study_entry.path().display(),
                        "skipping non-UTF-8 study directory during startup rescan"
                    );
                    continue;
                };
                self.note_at(&study_path, startup_time).await;
            }
        }
        Ok(())
    }

    /// Resolve `path` to its enclosing study folder key, `{inbox}/{tenant}/{study}`.
    fn study_key(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        let relative = path.strip_prefix(&self.inbox_root).ok()?;
        let mut segments = relative.components();
        let tenant = segments.next()?;
        let study = segments.next()?;
        Some(self.inbox_root.join(tenant.as_str()).join(study.as_str()))
    }
}
