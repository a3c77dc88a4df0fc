//! Import endpoints: job creation (multipart upload or remote URL) and
//! job snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{FromRequest, Json as JsonExtractor, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use silo_jobs::ImportJob;
use silo_model::{Format, RecordKind};
use silo_pipeline::{import_supported, run_import, CancelToken};

use crate::routes::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UrlImportRequest {
    pub resource_type: String,
    pub file_url: String,
    pub format: String,
}

#[derive(Debug, Serialize)]
pub struct ImportAccepted {
    pub job_id: Uuid,
    pub status: String,
    pub message: String,
}

/// A validated payload staged on local disk, ready for the pipeline.
struct StagedUpload {
    kind: RecordKind,
    format: Format,
    path: PathBuf,
    file_name: String,
}

/// POST /v1/imports — accept a payload and dispatch an import job.
///
/// Body is either `multipart/form-data` (`file`, `resource_type`,
/// `format`) or JSON `{resource_type, file_url, format}`. An
/// `Idempotency-Key` header short-circuits to the existing job.
pub async fn create_import(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Result<Response, ApiError> {
    let idempotency_key = req
        .headers()
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(key) = &idempotency_key {
        if let Some(job_id) = state.ledger.get(key).await {
            if let Some(job) = state.registry.get_import_job(job_id).await {
                return Ok(existing_job_response(&job).into_response());
            }
        }
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let upload = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| api_error(e.status(), e.body_text()))?;
        stage_multipart(&state, multipart).await?
    } else {
        let JsonExtractor(body) = JsonExtractor::<UrlImportRequest>::from_request(req, &())
            .await
            .map_err(|e| api_error(e.status(), e.body_text()))?;
        stage_url_fetch(&state, body).await?
    };

    if !import_supported(upload.kind, upload.format) {
        let _ = tokio::fs::remove_file(&upload.path).await;
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "UNSUPPORTED_FORMAT: '{}' is not accepted for '{}'",
                upload.format, upload.kind
            ),
        ));
    }

    let job = state
        .registry
        .create_import_job(upload.kind, &upload.file_name)
        .await;

    if let Some(key) = &idempotency_key {
        let winner = state.ledger.claim(key, job.id).await;
        if winner != job.id {
            // Lost a concurrent race on the same key: hand back the
            // winning job; ours is never started and ages out.
            let _ = tokio::fs::remove_file(&upload.path).await;
            if let Some(existing) = state.registry.get_import_job(winner).await {
                return Ok(existing_job_response(&existing).into_response());
            }
        }
    }

    state.metrics.job_created("import");
    info!(
        "created import job {} ({}, {}) from '{}'",
        job.id, upload.kind, upload.format, upload.file_name
    );

    spawn_import(state.clone(), job.id, upload.kind, upload.format, upload.path);

    Ok((
        StatusCode::ACCEPTED,
        Json(ImportAccepted {
            job_id: job.id,
            status: "pending".to_string(),
            message: "Import job created".to_string(),
        }),
    )
        .into_response())
}

fn existing_job_response(job: &ImportJob) -> (StatusCode, Json<ImportAccepted>) {
    (
        StatusCode::OK,
        Json(ImportAccepted {
            job_id: job.id,
            status: job.status.as_str().to_string(),
            message: "Job already exists for this idempotency key".to_string(),
        }),
    )
}

/// GET /v1/imports/:job_id
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ImportJob>, ApiError> {
    state
        .registry
        .get_import_job(job_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "import job not found"))
}

async fn stage_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<StagedUpload, ApiError> {
    let mut file: Option<(String, axum::body::Bytes)> = None;
    let mut resource_type = None;
    let mut format = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(e.status(), e.body_text()))?
    {
        match field.name().unwrap_or("") {
            "file" => {
                let name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .unwrap_or_else(|| "upload".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(e.status(), e.body_text()))?;
                file = Some((name, data));
            }
            "resource_type" => {
                resource_type = Some(field.text().await.map_err(|e| {
                    api_error(e.status(), e.body_text())
                })?);
            }
            "format" => {
                format = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| api_error(e.status(), e.body_text()))?,
                );
            }
            _ => {}
        }
    }

    let (file_name, data) =
        file.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'file' field"))?;
    let kind = parse_kind(resource_type.as_deref())?;
    let format = parse_format(format.as_deref())?;

    let path = state
        .config
        .uploads_dir
        .join(format!("{}_{}", Utc::now().timestamp(), file_name));
    tokio::fs::write(&path, &data).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to store upload: {}", e),
        )
    })?;

    Ok(StagedUpload {
        kind,
        format,
        path,
        file_name,
    })
}

async fn stage_url_fetch(
    state: &AppState,
    req: UrlImportRequest,
) -> Result<StagedUpload, ApiError> {
    let kind = parse_kind(Some(&req.resource_type))?;
    let format = parse_format(Some(&req.format))?;

    let url = url::Url::parse(&req.file_url)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid file_url: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "file_url must be http or https",
        ));
    }

    let response = state
        .http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("download failed: {}", e)))?;
    let data = response
        .bytes()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("download failed: {}", e)))?;

    let file_name = url
        .path_segments()
        .and_then(|segments| segments.last().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "download".to_string());

    let path = state
        .config
        .uploads_dir
        .join(format!("download_{}", Utc::now().timestamp()));
    tokio::fs::write(&path, &data).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to store download: {}", e),
        )
    })?;

    Ok(StagedUpload {
        kind,
        format,
        path,
        file_name,
    })
}

fn parse_kind(raw: Option<&str>) -> Result<RecordKind, ApiError> {
    let raw = raw.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'resource_type'"))?;
    RecordKind::parse(raw).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown resource_type '{}'", raw),
        )
    })
}

fn parse_format(raw: Option<&str>) -> Result<Format, ApiError> {
    let raw = raw.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'format'"))?;
    Format::parse(raw).ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, format!("unknown format '{}'", raw))
    })
}

/// Keep only the basename of a client-supplied file name.
fn sanitize_file_name(raw: &str) -> String {
    std::path::Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

fn spawn_import(
    state: Arc<AppState>,
    job_id: Uuid,
    kind: RecordKind,
    format: Format,
    path: PathBuf,
) {
    tokio::spawn(async move {
        let cancel = CancelToken::new();
        state.metrics.active_jobs.inc();
        let result = run_import(
            state.store.clone(),
            state.registry.clone(),
            job_id,
            kind,
            format,
            &path,
            &cancel,
        )
        .await;
        state.metrics.active_jobs.dec();

        match result {
            Ok(summary) => {
                state.metrics.records_processed.inc_by(summary.total);
                let outcome = state
                    .registry
                    .get_import_job(job_id)
                    .await
                    .map(|j| j.status.as_str())
                    .unwrap_or("unknown");
                state.metrics.job_finished("import", outcome);
            }
            Err(e) => {
                error!("import job {} aborted: {}", job_id, e);
                state.metrics.job_finished("import", "failed");
            }
        }
    });
}
