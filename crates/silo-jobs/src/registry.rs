//! In-memory job directory.
//!
//! All pipeline-side mutations flow through the update methods here;
//! reads hand out deep-copied snapshots. One reader-writer lock guards
//! each index, so a reader always observes a consistent job with
//! monotonically non-decreasing counters and progress.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use silo_model::{Format, RecordKind, ValidationError};

use crate::error_log::BoundedErrorLog;
use crate::job::{ExportJob, ImportJob, JobStatus};

struct ImportSlot {
    job: ImportJob,
    errors: BoundedErrorLog,
}

impl ImportSlot {
    fn snapshot(&self) -> ImportJob {
        let mut job = self.job.clone();
        job.errors = self.errors.to_vec();
        job
    }
}

#[derive(Default)]
pub struct JobRegistry {
    imports: RwLock<HashMap<Uuid, ImportSlot>>,
    exports: RwLock<HashMap<Uuid, ExportJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_import_job(&self, kind: RecordKind, file_name: &str) -> ImportJob {
        let job = ImportJob::new(kind, file_name.to_string());
        let snapshot = job.clone();
        self.imports.write().await.insert(
            job.id,
            ImportSlot {
                job,
                errors: BoundedErrorLog::new(),
            },
        );
        snapshot
    }

    pub async fn create_export_job(
        &self,
        kind: RecordKind,
        format: Format,
        filters: HashMap<String, String>,
    ) -> ExportJob {
        let job = ExportJob::new(kind, format, filters);
        let snapshot = job.clone();
        self.exports.write().await.insert(job.id, job);
        snapshot
    }

    pub async fn get_import_job(&self, id: Uuid) -> Option<ImportJob> {
        self.imports.read().await.get(&id).map(|slot| slot.snapshot())
    }

    pub async fn get_export_job(&self, id: Uuid) -> Option<ExportJob> {
        self.exports.read().await.get(&id).cloned()
    }

    /// Merge an import progress update. Counters and progress only move
    /// forward; a terminal status pins progress to 100, stamps
    /// `completed_at` once and freezes the job.
    pub async fn update_import_job(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        total: u64,
        valid: u64,
        error_count: u64,
        new_errors: Vec<ValidationError>,
    ) {
        let mut imports = self.imports.write().await;
        let Some(slot) = imports.get_mut(&id) else {
            return;
        };
        if slot.job.status.is_terminal() {
            return;
        }

        slot.job.status = status;
        slot.job.total_records = slot.job.total_records.max(total);
        slot.job.valid_records = slot.job.valid_records.max(valid);
        slot.job.error_records = slot.job.error_records.max(error_count);
        slot.errors.extend(new_errors);

        if status.is_terminal() {
            slot.job.progress = 100;
            slot.job.completed_at = Some(Utc::now());
        } else {
            slot.job.progress = slot.job.progress.max(progress.min(99));
        }
    }

    /// Merge an export progress update; same monotonicity rules as
    /// imports. `download_url` is only ever set, never cleared.
    pub async fn update_export_job(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        total: u64,
        download_url: Option<String>,
    ) {
        let mut exports = self.exports.write().await;
        let Some(job) = exports.get_mut(&id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }

        job.status = status;
        job.total_records = job.total_records.max(total);
        if download_url.is_some() {
            job.download_url = download_url;
        }

        if status.is_terminal() {
            job.progress = 100;
            job.completed_at = Some(Utc::now());
        } else {
            job.progress = job.progress.max(progress.min(99));
        }
    }

    /// Drop jobs created more than `max_age` ago, whatever their status.
    /// Returns (imports dropped, exports dropped).
    pub async fn cleanup_old(&self, max_age: Duration) -> (usize, usize) {
        let cutoff = Utc::now() - max_age;

        let mut imports = self.imports.write().await;
        let before = imports.len();
        imports.retain(|_, slot| slot.job.created_at >= cutoff);
        let dropped_imports = before - imports.len();
        drop(imports);

        let mut exports = self.exports.write().await;
        let before = exports.len();
        exports.retain(|_, job| job.created_at >= cutoff);
        let dropped_exports = before - exports.len();

        (dropped_imports, dropped_exports)
    }

    pub async fn stats(&self) -> RegistryStats {
        let imports = self.imports.read().await;
        let mut import_counts = StatusCounts::default();
        for slot in imports.values() {
            import_counts.add(slot.job.status);
        }
        drop(imports);

        let exports = self.exports.read().await;
        let mut export_counts = StatusCounts::default();
        for job in exports.values() {
            export_counts.add(job.status);
        }

        RegistryStats {
            imports: import_counts,
            exports: export_counts,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl StatusCounts {
    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub imports: StatusCounts,
    pub exports: StatusCounts,
}
