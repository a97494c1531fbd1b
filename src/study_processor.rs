//! Discovers, mutates, and uploads the instances of a single study folder,
//! then relocates it into the processed or failed tree.

use crate::discovery::discover_instances;
use crate::error::{FatalProcessorError, InstanceError};
use crate::mutation::mutate_institution_name;
use crate::quarantine::{destination_path, move_study, write_error_record, ErrorRecord, InstanceFailure};
use crate::uploader::Uploader;
use camino::{Utf8Path, Utf8PathBuf};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::time::Instant;

/// The classification a study folder receives once its per-instance walk
/// completes (or a fatal error aborts it beforehand).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Partial,
    Failed,
    Error,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Partial => "partial",
            Outcome::Failed => "failed",
            Outcome::Error => "error",
        }
    }

    fn is_quarantined(self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Error)
    }
}

pub struct StudyProcessor {
    uploader: Arc<Uploader>,
    processed_root: Utf8PathBuf,
    failed_root: Utf8PathBuf,
}

impl StudyProcessor {
    pub fn new(uploader: Arc<Uploader>, processed_root: Utf8PathBuf, failed_root: Utf8PathBuf) -> Self {
        Self {
            uploader,
            processed_root,
            failed_root,
        }
    }

    /// Process `folder` belonging to `tenant`: discover instances, mutate
    /// and upload each, classify the outcome, and move the folder.
    ///
    /// Never returns an error to the caller; a fatal fault is itself
    /// classified as [Outcome::Error] and quarantined. Surfaces a
    /// [FatalProcessorError] only when the resulting move/quarantine step
    /// itself fails, in which case the folder is left in place for a later
    /// retry (§4.5 rationale).
    pub async fn process(&self, folder: &Utf8Path, tenant: &str) -> Result<Outcome, FatalProcessorError> {
        gauge!(crate::metrics::ACTIVE_IMPORTS).increment(1.0);
        let started = Instant::now();
        let result = self.process_inner(folder, tenant).await;
        gauge!(crate::metrics::ACTIVE_IMPORTS).decrement(1.0);

        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => Outcome::Error,
        };
        histogram!(crate::metrics::IMPORT_DURATION_SECONDS, "clinic_id" => tenant.to_string())
            .record(started.elapsed().as_secs_f64());
        counter!(
            crate::metrics::IMPORTS_TOTAL,
            "clinic_id" => tenant.to_string(),
            "status" => outcome.label(),
        )
        .increment(1);

        tracing::info!(
            tenant,
            folder = folder.as_str(),
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "study processed"
        );
        result
    }

    async fn process_inner(&self, folder: &Utf8Path, tenant: &str) -> Result<Outcome, FatalProcessorError> {
        let folder = folder.to_owned();
        let tenant_owned = tenant.to_string();
        let uploader = Arc::clone(&self.uploader);

        let walk_result = {
            let folder = folder.clone();
            let tenant = tenant_owned.clone();
            tokio::task::spawn_blocking(move || discover_instances(&folder))
                .await
                .expect("discovery task panicked")
        };

        let instances = match walk_result {
            Ok(instances) => instances,
            Err(source) => return self.quarantine_on_error(&folder, &tenant_owned, FatalProcessorError::Discovery(source)).await,
        };

        if instances.is_empty() {
            let reason = "No DICOM files found";
            return self
                .quarantine(&folder, &tenant_owned, Outcome::Failed, reason, Vec::new())
                .await;
        }

        let mut failures = Vec::new();
        let mut successes = 0u32;
        for instance in &instances {
            match self.process_instance(instance, &tenant_owned, &uploader).await {
                Ok(()) => {
                    successes += 1;
                    counter!(crate::metrics::INSTANCES_UPLOADED_TOTAL, "clinic_id" => tenant_owned.clone())
                        .increment(1);
                }
                Err(e) => {
                    let relative = instance.strip_prefix(&folder).unwrap_or(instance);
                    failures.push(InstanceFailure {
                        file: relative.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let outcome = match (successes, failures.len()) {
            (n, 0) if n > 0 => Outcome::Success,
            (n, _) if n > 0 => Outcome::Partial,
            _ => Outcome::Failed,
        };

        let reason = if outcome == Outcome::Failed {
            "All instances failed"
        } else {
            ""
        };
        self.quarantine(&folder, &tenant_owned, outcome, reason, failures).await
    }

    async fn process_instance(
        &self,
        instance: &Utf8Path,
        tenant: &str,
        uploader: &Uploader,
    ) -> Result<(), InstanceError> {
        let instance_owned = instance.to_owned();
        let tenant_owned = tenant.to_string();
        let bytes = tokio::task::spawn_blocking(move || {
            mutate_institution_name(&instance_owned, &tenant_owned)
        })
        .await
        .expect("mutation task panicked")?;

        let filename = instance
            .file_name()
            .expect("instance path has a basename");
        uploader.upload(&bytes, filename).await?;
        Ok(())
    }

    /// Move the study to its final destination (processed, or failed with an
    /// error record) and return the resulting outcome.
    async fn quarantine(
        &self,
        folder: &Utf8Path,
        tenant: &str,
        outcome: Outcome,
        reason: &str,
        errors: Vec<InstanceFailure>,
    ) -> Result<Outcome, FatalProcessorError> {
        let root = if outcome.is_quarantined() {
            &self.failed_root
        } else {
            &self.processed_root
        };
        let folder = folder.to_owned();
        let tenant = tenant.to_string();
        let root = root.clone();

        let dest = {
            let folder = folder.clone();
            let tenant = tenant.clone();
            let root = root.clone();
            tokio::task::spawn_blocking(move || destination_path(&root, &tenant, &folder))
                .await
                .expect("destination computation panicked")
        };

        let move_result = {
            let folder = folder.clone();
            let dest = dest.clone();
            tokio::task::spawn_blocking(move || move_study(&folder, &dest))
                .await
                .expect("move task panicked")
        };

        if let Err(source) = move_result {
            return Err(FatalProcessorError::Move { dest, source });
        }

        if outcome.is_quarantined() {
            let study_folder = folder
                .file_name()
                .expect("study folder has a basename")
                .to_string();
            let mut record = ErrorRecord::new(&study_folder, &tenant, reason);
            record.errors = errors;
            let dest_for_record = dest.clone();
            tokio::task::spawn_blocking(move || write_error_record(&dest_for_record, &record))
                .await
                .expect("error record write task panicked")
                .map_err(|source| FatalProcessorError::ErrorRecord {
                    path: crate::quarantine::error_record_path(&dest),
                    source,
                })?;
        }

        Ok(outcome)
    }

    async fn quarantine_on_error(
        &self,
        folder: &Utf8Path,
        tenant: &str,
        error: FatalProcessorError,
    ) -> Result<Outcome, FatalProcessorError> {
        tracing::error!(tenant, folder = folder.as_str(), error = %error, "fatal error processing study");
        self.quarantine(folder, tenant, Outcome::Error, &error.to_string(), Vec::new())
            .await
    }
}
