//! Export endpoints: streamed responses and asynchronous export jobs.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Response, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use silo_jobs::ExportJob;
use silo_model::{Format, RecordKind};
use silo_pipeline::{export_supported, run_export, stream_export, CancelToken, PipelineError};

use crate::routes::{api_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub resource_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub filters: HashMap<String, String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ExportAccepted {
    pub job_id: Uuid,
    pub status: String,
}

/// GET /v1/exports?resource=<kind>&format=<fmt>&<filters> — stream the
/// filtered result set as an attachment, flushed in row chunks.
pub async fn stream_export_handler(
    State(state): State<Arc<AppState>>,
    Query(mut params): Query<HashMap<String, String>>,
) -> Result<Response<Body>, ApiError> {
    let resource = params
        .remove("resource")
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing 'resource' parameter"))?;
    let kind = RecordKind::parse(&resource).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown resource '{}'", resource),
        )
    })?;
    let format = match params.remove("format") {
        None => Format::Ndjson,
        Some(raw) => Format::parse(&raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("unknown format '{}'", raw))
        })?,
    };

    // Remaining query parameters are filter candidates; the store only
    // interprets the whitelisted keys for this kind.
    let stream = stream_export(state.store.clone(), kind, format, params, None)
        .await
        .map_err(|e| match e {
            PipelineError::UnsupportedFormat { .. } => {
                api_error(StatusCode::BAD_REQUEST, e.to_string())
            }
            other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}.{}", kind, format.extension()),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// POST /v1/exports — create an asynchronous export job.
pub async fn create_export(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExportRequest>,
) -> Result<(StatusCode, Json<ExportAccepted>), ApiError> {
    let kind = RecordKind::parse(&req.resource_type).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown resource_type '{}'", req.resource_type),
        )
    })?;
    let format = match req.format.as_deref() {
        None => Format::Ndjson,
        Some(raw) => Format::parse(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("unknown format '{}'", raw))
        })?,
    };
    if !export_supported(kind, format) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "UNSUPPORTED_FORMAT: '{}' is not accepted for '{}'",
                format, kind
            ),
        ));
    }

    let job = state
        .registry
        .create_export_job(kind, format, req.filters.clone())
        .await;
    state.metrics.job_created("export");
    info!("created export job {} ({}, {})", job.id, kind, format);

    let state_for_job = state.clone();
    let filters = req.filters;
    let fields = req.fields;
    let job_id = job.id;
    tokio::spawn(async move {
        let cancel = CancelToken::new();
        state_for_job.metrics.active_jobs.inc();
        let result = run_export(
            state_for_job.store.clone(),
            state_for_job.registry.clone(),
            job_id,
            kind,
            format,
            filters,
            fields,
            &state_for_job.config.exports_dir,
            &cancel,
        )
        .await;
        state_for_job.metrics.active_jobs.dec();

        match result {
            Ok(_) => {
                let outcome = state_for_job
                    .registry
                    .get_export_job(job_id)
                    .await
                    .map(|j| j.status.as_str())
                    .unwrap_or("unknown");
                state_for_job.metrics.job_finished("export", outcome);
            }
            Err(e) => {
                error!("export job {} aborted: {}", job_id, e);
                state_for_job.metrics.job_finished("export", "failed");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ExportAccepted {
            job_id: job.id,
            status: "pending".to_string(),
        }),
    ))
}

/// GET /v1/exports/:job_id
pub async fn get_export(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ExportJob>, ApiError> {
    state
        .registry
        .get_export_job(job_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "export job not found"))
}
