//! Batched streaming import.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use silo_jobs::{JobRegistry, JobStatus};
use silo_model::{Article, Comment, Format, RecordKind, User, ValidationError, Validator};
use silo_store::Store;

use crate::cancel::CancelToken;
use crate::decode::{CsvUserDecoder, Decoded, NdjsonDecoder};
use crate::error::PipelineError;

/// Records per upsert transaction.
pub const BATCH_SIZE: usize = 1000;

/// The closed set of legal import combinations.
pub fn import_supported(kind: RecordKind, format: Format) -> bool {
    matches!(
        (kind, format),
        (RecordKind::Users, Format::Csv)
            | (RecordKind::Articles, Format::Ndjson)
            | (RecordKind::Comments, Format::Ndjson)
    )
}

/// Progress while streaming, where the total row count is unknown:
/// monotonic in `processed`, asymptotic to 50, pinned to 100 by the
/// registry on the terminal update.
fn import_progress(processed: u64) -> u8 {
    (processed * 50 / (processed + 1000)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub total: u64,
    pub valid: u64,
    pub errors: u64,
    pub cancelled: bool,
}

/// Decoder plus its typed accumulation batch, paired per kind so the
/// batch loop below stays format-agnostic.
enum Ingest {
    Users {
        decoder: CsvUserDecoder,
        batch: Vec<(u64, User)>,
    },
    Articles {
        decoder: NdjsonDecoder<Article>,
        batch: Vec<(u64, Article)>,
    },
    Comments {
        decoder: NdjsonDecoder<Comment>,
        batch: Vec<(u64, Comment)>,
    },
}

/// Result of pulling one row from the input.
enum Pulled {
    /// Record appended to the batch.
    Batched,
    /// Row-level decode failure; counted, not batched.
    Invalid(ValidationError),
    Eof,
}

struct FlushOutcome {
    accepted: u64,
    rejected: Vec<ValidationError>,
}

impl Ingest {
    fn open(kind: RecordKind, format: Format, path: &Path) -> Result<Self, PipelineError> {
        match (kind, format) {
            (RecordKind::Users, Format::Csv) => Ok(Ingest::Users {
                decoder: CsvUserDecoder::open(path)?,
                batch: Vec::new(),
            }),
            (RecordKind::Articles, Format::Ndjson) => Ok(Ingest::Articles {
                decoder: NdjsonDecoder::open(path)?,
                batch: Vec::new(),
            }),
            (RecordKind::Comments, Format::Ndjson) => Ok(Ingest::Comments {
                decoder: NdjsonDecoder::open(path)?,
                batch: Vec::new(),
            }),
            _ => Err(PipelineError::UnsupportedFormat { kind, format }),
        }
    }

    fn pull(&mut self) -> Result<Pulled, PipelineError> {
        fn step<T>(
            next: Option<Result<Decoded<T>, PipelineError>>,
            batch: &mut Vec<(u64, T)>,
        ) -> Result<Pulled, PipelineError> {
            match next {
                None => Ok(Pulled::Eof),
                Some(Err(e)) => Err(e),
                Some(Ok(Decoded::Record { row, record })) => {
                    batch.push((row, record));
                    Ok(Pulled::Batched)
                }
                Some(Ok(Decoded::Invalid(err))) => Ok(Pulled::Invalid(err)),
            }
        }

        match self {
            Ingest::Users { decoder, batch } => step(decoder.next_row(), batch),
            Ingest::Articles { decoder, batch } => step(decoder.next_row(), batch),
            Ingest::Comments { decoder, batch } => step(decoder.next_row(), batch),
        }
    }

    fn batch_len(&self) -> usize {
        match self {
            Ingest::Users { batch, .. } => batch.len(),
            Ingest::Articles { batch, .. } => batch.len(),
            Ingest::Comments { batch, .. } => batch.len(),
        }
    }

    /// Validate the accumulated batch, persist the accepted subset in
    /// one transaction and reset the batch.
    async fn flush(
        &mut self,
        validator: &mut Validator<'_, dyn Store + '_>,
        store: &dyn Store,
    ) -> Result<FlushOutcome, PipelineError> {
        let mut rejected = Vec::new();
        let accepted = match self {
            Ingest::Users { batch, .. } => {
                let mut accepted = Vec::with_capacity(batch.len());
                for (row, user) in batch.iter_mut() {
                    let errors = validator
                        .validate_user(user, *row)
                        .await
                        .map_err(PipelineError::Probe)?;
                    if errors.is_empty() {
                        accepted.push(user.clone());
                    } else {
                        rejected.extend(errors);
                    }
                }
                if !accepted.is_empty() {
                    store.batch_upsert_users(&accepted).await?;
                }
                batch.clear();
                accepted.len() as u64
            }
            Ingest::Articles { batch, .. } => {
                let mut accepted = Vec::with_capacity(batch.len());
                for (row, article) in batch.iter_mut() {
                    let errors = validator
                        .validate_article(article, *row)
                        .await
                        .map_err(PipelineError::Probe)?;
                    if errors.is_empty() {
                        accepted.push(article.clone());
                    } else {
                        rejected.extend(errors);
                    }
                }
                if !accepted.is_empty() {
                    store.batch_upsert_articles(&accepted).await?;
                }
                batch.clear();
                accepted.len() as u64
            }
            Ingest::Comments { batch, .. } => {
                let mut accepted = Vec::with_capacity(batch.len());
                for (row, comment) in batch.iter_mut() {
                    let errors = validator
                        .validate_comment(comment, *row)
                        .await
                        .map_err(PipelineError::Probe)?;
                    if errors.is_empty() {
                        accepted.push(comment.clone());
                    } else {
                        rejected.extend(errors);
                    }
                }
                if !accepted.is_empty() {
                    store.batch_upsert_comments(&accepted).await?;
                }
                batch.clear();
                accepted.len() as u64
            }
        };
        Ok(FlushOutcome { accepted, rejected })
    }
}

/// Run one import job to completion.
///
/// Rows are processed and persisted in input order, one batch
/// transaction at a time. Validation failures accumulate on the job and
/// never abort the run; an operational failure (I/O, database, probe)
/// marks the job failed with a single general error. Cancellation
/// discards the in-flight batch and leaves the job in `processing` for
/// the sweeper to reap.
pub async fn run_import(
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    job_id: Uuid,
    kind: RecordKind,
    format: Format,
    path: &Path,
    cancel: &CancelToken,
) -> Result<ImportSummary, PipelineError> {
    let result = import_inner(&*store, &registry, job_id, kind, format, path, cancel).await;
    match &result {
        Ok(summary) if summary.cancelled => {
            info!(
                "import job {} cancelled after {} records",
                job_id, summary.total
            );
        }
        Ok(summary) => {
            info!(
                "import job {} finished: {} total, {} valid, {} errors",
                job_id, summary.total, summary.valid, summary.errors
            );
        }
        Err(e) => {
            warn!("import job {} failed: {}", job_id, e);
            // Counter merges are monotonic, so zeros leave the last
            // reported batch totals in place.
            registry
                .update_import_job(
                    job_id,
                    JobStatus::Failed,
                    100,
                    0,
                    0,
                    0,
                    vec![ValidationError::new(0, "general", "", e.to_string())],
                )
                .await;
        }
    }
    result
}

async fn import_inner(
    store: &dyn Store,
    registry: &JobRegistry,
    job_id: Uuid,
    kind: RecordKind,
    format: Format,
    path: &Path,
    cancel: &CancelToken,
) -> Result<ImportSummary, PipelineError> {
    let mut ingest = Ingest::open(kind, format, path)?;
    registry
        .update_import_job(job_id, JobStatus::Processing, 0, 0, 0, 0, vec![])
        .await;

    let mut validator = Validator::new(store);
    let mut total: u64 = 0;
    let mut valid: u64 = 0;
    let mut errored: u64 = 0;
    // Decode errors and batch rejections waiting for the next registry
    // update.
    let mut pending: Vec<ValidationError> = Vec::new();

    let cancelled = |total, valid, errored| ImportSummary {
        total,
        valid,
        errors: errored,
        cancelled: true,
    };

    loop {
        if cancel.is_cancelled() {
            return Ok(cancelled(total, valid, errored));
        }
        match ingest.pull()? {
            Pulled::Eof => break,
            Pulled::Batched => total += 1,
            Pulled::Invalid(err) => {
                total += 1;
                errored += 1;
                pending.push(err);
            }
        }

        if ingest.batch_len() >= BATCH_SIZE {
            if cancel.is_cancelled() {
                return Ok(cancelled(total, valid, errored));
            }
            let outcome = ingest.flush(&mut validator, store).await?;
            valid += outcome.accepted;
            errored += outcome.rejected.len() as u64;
            pending.extend(outcome.rejected);
            registry
                .update_import_job(
                    job_id,
                    JobStatus::Processing,
                    import_progress(total),
                    total,
                    valid,
                    errored,
                    std::mem::take(&mut pending),
                )
                .await;
        }
    }

    if ingest.batch_len() > 0 {
        if cancel.is_cancelled() {
            return Ok(cancelled(total, valid, errored));
        }
        let outcome = ingest.flush(&mut validator, store).await?;
        valid += outcome.accepted;
        errored += outcome.rejected.len() as u64;
        pending.extend(outcome.rejected);
    }

    // Completed when anything was persisted or the input was empty;
    // failed only when every processed row errored.
    let status = if valid == 0 && errored > 0 {
        JobStatus::Failed
    } else {
        JobStatus::Completed
    };
    registry
        .update_import_job(
            job_id,
            status,
            100,
            total,
            valid,
            errored,
            std::mem::take(&mut pending),
        )
        .await;

    Ok(ImportSummary {
        total,
        valid,
        errors: errored,
        cancelled: false,
    })
}
