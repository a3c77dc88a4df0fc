//! Export paths: streamed-to-response and file-to-disk.
//!
//! Both share one row serialiser. Output is flushed in fixed row
//! chunks so memory stays O(1) regardless of result size; the `json`
//! format is emitted as JSON Lines for the same reason.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use silo_jobs::{JobRegistry, JobStatus};
use silo_model::{Format, RecordKind, User};
use silo_store::{RecordCursor, Store, StoreError};

use crate::cancel::CancelToken;
use crate::error::PipelineError;

/// Rows per chunk on both export paths.
const FLUSH_ROWS: usize = 100;

const USER_CSV_HEADER: &str = "id,email,name,role,active,created_at,updated_at\n";

/// CSV exports exist only for users; NDJSON and JSON cover every kind.
pub fn export_supported(kind: RecordKind, format: Format) -> bool {
    match format {
        Format::Csv => kind == RecordKind::Users,
        Format::Ndjson | Format::Json => true,
    }
}

/// Export progress heuristic: ramps to 90 over the first 10,000 rows,
/// pinned to 100 by the registry at completion.
fn export_progress(processed: u64) -> u8 {
    (processed * 90 / 10_000).min(90) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub total: u64,
    pub cancelled: bool,
}

/// Chunked body for a streaming export response.
pub type ExportStream = ReceiverStream<Result<Vec<u8>, PipelineError>>;

struct RowSerialiser {
    format: Format,
    fields: Option<Vec<String>>,
    buf: Vec<u8>,
    rows: usize,
}

impl RowSerialiser {
    fn new(format: Format, fields: Option<Vec<String>>) -> Self {
        let mut buf = Vec::new();
        if format == Format::Csv {
            buf.extend_from_slice(USER_CSV_HEADER.as_bytes());
        }
        Self {
            format,
            fields,
            buf,
            rows: 0,
        }
    }

    fn write_user(&mut self, user: &User) -> Result<(), PipelineError> {
        match self.format {
            Format::Csv => {
                let ts = |t: &Option<chrono::DateTime<Utc>>| {
                    t.map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                        .unwrap_or_default()
                };
                let id = user.id.to_string();
                let created = ts(&user.created_at);
                let updated = ts(&user.updated_at);
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(&mut self.buf);
                writer.write_record([
                    id.as_str(),
                    user.email.as_str(),
                    user.name.as_str(),
                    user.role.as_str(),
                    if user.active { "true" } else { "false" },
                    created.as_str(),
                    updated.as_str(),
                ])?;
                writer.flush()?;
                drop(writer);
                self.rows += 1;
                Ok(())
            }
            Format::Ndjson | Format::Json => self.write_json(user),
        }
    }

    /// One compact JSON object per line; an optional projection keeps
    /// only the requested fields.
    fn write_json<T: Serialize>(&mut self, record: &T) -> Result<(), PipelineError> {
        match &self.fields {
            None => serde_json::to_writer(&mut self.buf, record)?,
            Some(fields) => {
                let mut value = serde_json::to_value(record)?;
                if let serde_json::Value::Object(map) = &mut value {
                    map.retain(|key, _| fields.iter().any(|f| f == key));
                }
                serde_json::to_writer(&mut self.buf, &value)?;
            }
        }
        self.buf.push(b'\n');
        self.rows += 1;
        Ok(())
    }

    fn rows_in_chunk(&self) -> usize {
        self.rows
    }

    fn take_chunk(&mut self) -> Vec<u8> {
        self.rows = 0;
        std::mem::take(&mut self.buf)
    }
}

/// A store cursor of any kind feeding the shared serialiser.
enum AnyCursor {
    Users(RecordCursor<User>),
    Articles(RecordCursor<silo_model::Article>),
    Comments(RecordCursor<silo_model::Comment>),
}

impl AnyCursor {
    async fn open(
        store: &dyn Store,
        kind: RecordKind,
        filters: &HashMap<String, String>,
    ) -> Result<Self, StoreError> {
        Ok(match kind {
            RecordKind::Users => AnyCursor::Users(store.get_users(filters).await?),
            RecordKind::Articles => AnyCursor::Articles(store.get_articles(filters).await?),
            RecordKind::Comments => AnyCursor::Comments(store.get_comments(filters).await?),
        })
    }

    /// Serialise the next row; Ok(false) at end of cursor.
    async fn next_into(&mut self, ser: &mut RowSerialiser) -> Result<bool, PipelineError> {
        match self {
            AnyCursor::Users(cursor) => match cursor.next().await {
                None => Ok(false),
                Some(row) => {
                    ser.write_user(&row?)?;
                    Ok(true)
                }
            },
            AnyCursor::Articles(cursor) => match cursor.next().await {
                None => Ok(false),
                Some(row) => {
                    ser.write_json(&row?)?;
                    Ok(true)
                }
            },
            AnyCursor::Comments(cursor) => match cursor.next().await {
                None => Ok(false),
                Some(row) => {
                    ser.write_json(&row?)?;
                    Ok(true)
                }
            },
        }
    }
}

/// Start a streaming export and return its chunked body.
///
/// Serialisation runs on a spawned task; the bounded channel paces the
/// cursor read to the response writer. The format header (CSV) is
/// emitted even for an empty result.
pub async fn stream_export(
    store: Arc<dyn Store>,
    kind: RecordKind,
    format: Format,
    filters: HashMap<String, String>,
    fields: Option<Vec<String>>,
) -> Result<ExportStream, PipelineError> {
    if !export_supported(kind, format) {
        return Err(PipelineError::UnsupportedFormat { kind, format });
    }

    let (tx, rx) = mpsc::channel::<Result<Vec<u8>, PipelineError>>(4);
    tokio::spawn(async move {
        let mut ser = RowSerialiser::new(format, fields);
        let mut cursor = match AnyCursor::open(&*store, kind, &filters).await {
            Ok(cursor) => cursor,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        loop {
            match cursor.next_into(&mut ser).await {
                Ok(false) => break,
                Ok(true) => {
                    if ser.rows_in_chunk() >= FLUSH_ROWS
                        && tx.send(Ok(ser.take_chunk())).await.is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    warn!("streaming export aborted: {}", e);
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
        let tail = ser.take_chunk();
        if !tail.is_empty() {
            let _ = tx.send(Ok(tail)).await;
        }
    });

    Ok(ReceiverStream::new(rx))
}

enum Written {
    Done { total: u64 },
    Cancelled { total: u64 },
}

/// Run one asynchronous export job: write the filtered result set to
/// `<export_dir>/<kind>_<format>_<unix_ts>.<ext>` and record the
/// download URL on completion. A partial file is removed on error and
/// on cancellation; a cancelled job stays `processing`.
pub async fn run_export(
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    job_id: Uuid,
    kind: RecordKind,
    format: Format,
    filters: HashMap<String, String>,
    fields: Option<Vec<String>>,
    export_dir: &Path,
    cancel: &CancelToken,
) -> Result<ExportSummary, PipelineError> {
    if !export_supported(kind, format) {
        registry
            .update_export_job(job_id, JobStatus::Failed, 100, 0, None)
            .await;
        return Err(PipelineError::UnsupportedFormat { kind, format });
    }

    registry
        .update_export_job(job_id, JobStatus::Processing, 0, 0, None)
        .await;

    let file_name = format!(
        "{}_{}_{}.{}",
        kind.as_str(),
        format.as_str(),
        Utc::now().timestamp(),
        format.extension()
    );
    let path = export_dir.join(&file_name);

    match write_file(
        &*store, &registry, job_id, kind, format, &filters, fields, &path, cancel,
    )
    .await
    {
        Ok(Written::Done { total }) => {
            registry
                .update_export_job(
                    job_id,
                    JobStatus::Completed,
                    100,
                    total,
                    Some(format!("/downloads/{}", file_name)),
                )
                .await;
            info!("export job {} wrote {} rows to {}", job_id, total, file_name);
            Ok(ExportSummary {
                total,
                cancelled: false,
            })
        }
        Ok(Written::Cancelled { total }) => {
            let _ = tokio::fs::remove_file(&path).await;
            info!("export job {} cancelled after {} rows", job_id, total);
            Ok(ExportSummary {
                total,
                cancelled: true,
            })
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            warn!("export job {} failed: {}", job_id, e);
            registry
                .update_export_job(job_id, JobStatus::Failed, 100, 0, None)
                .await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_file(
    store: &dyn Store,
    registry: &JobRegistry,
    job_id: Uuid,
    kind: RecordKind,
    format: Format,
    filters: &HashMap<String, String>,
    fields: Option<Vec<String>>,
    path: &Path,
    cancel: &CancelToken,
) -> Result<Written, PipelineError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut ser = RowSerialiser::new(format, fields);
    let mut cursor = AnyCursor::open(store, kind, filters).await?;
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(Written::Cancelled { total });
        }
        if !cursor.next_into(&mut ser).await? {
            break;
        }
        total += 1;
        if ser.rows_in_chunk() >= FLUSH_ROWS {
            file.write_all(&ser.take_chunk()).await?;
            registry
                .update_export_job(
                    job_id,
                    JobStatus::Processing,
                    export_progress(total),
                    total,
                    None,
                )
                .await;
        }
    }

    let tail = ser.take_chunk();
    if !tail.is_empty() {
        file.write_all(&tail).await?;
    }
    file.flush().await?;
    Ok(Written::Done { total })
}
