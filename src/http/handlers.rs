//! Request handlers

use crate::error::{Result, ServiceError};
use crate::http::errors::ApiError;
use crate::http::state::AppState;
use crate::http::upload::read_upload;
use crate::models::ModelCatalog;
use crate::storage::{OutputKind, ProcessingJob};
use crate::sweep::{run_sweep, JobGuard};
use crate::tracing_config::{events, spans};
use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, rejection::QueryRejection, Multipart, Query, State},
    http::{header, HeaderValue},
    response::Response,
    Json,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, Instrument};

/// Name reported by the health endpoint
pub const SERVICE_NAME: &str = "kyarafit-image-service";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub message: String,
}

/// Query string accepted by the processing endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ProcessParams {
    pub model: Option<String>,
}

impl ProcessParams {
    /// Parse the query, turning rejections into JSON `invalid_input` errors
    fn from_query(
        query: std::result::Result<Query<Self>, QueryRejection>,
    ) -> std::result::Result<Self, ApiError> {
        let Query(params) = query.map_err(|rejection| {
            ApiError::from(ServiceError::invalid_input(format!(
                "Invalid query string: {}",
                rejection.body_text()
            )))
        })?;
        Ok(params)
    }

    /// Model named in the query, ignoring a blank `?model=`
    fn model(self) -> Option<String> {
        self.model
            .map(|model| model.trim().to_owned())
            .filter(|model| !model.is_empty())
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
    })
}

pub async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: ModelCatalog::names().into_iter().map(str::to_owned).collect(),
    })
}

pub async fn remove_background(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<ProcessParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError> {
    let params = ProcessParams::from_query(query)?;
    process_upload(state, OutputKind::Processed, params, multipart).await
}

pub async fn segment(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<ProcessParams>, QueryRejection>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError> {
    let params = ProcessParams::from_query(query)?;
    process_upload(state, OutputKind::Segmented, params, multipart).await
}

pub async fn cleanup(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<CleanupResponse>, ApiError> {
    let report = run_sweep(
        state.storage.clone(),
        state.config.sweep_max_age(),
        state.active_jobs.clone(),
    )
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "Cleanup failed");
        ApiError::from(e).with_context("Cleanup failed")
    })?;

    Ok(Json(CleanupResponse {
        message: format!("Cleaned up {} files", report.removed),
    }))
}

/// Shared pipeline of both processing endpoints
///
/// The endpoints differ only in output suffix and log label.
async fn process_upload(
    state: Arc<AppState>,
    kind: OutputKind,
    params: ProcessParams,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, ApiError> {
    let upload = read_upload(multipart, state.config.sniff_content).await?;
    let model = upload
        .model
        .clone()
        .or_else(|| params.model())
        .unwrap_or_else(|| state.config.default_model.clone());

    let job = ProcessingJob::new(&state.storage, kind, model);
    let guard = state.active_jobs.register(job.token);
    let token = job.token.to_string();
    let span = spans::job(&token, &job.model, kind.suffix());

    async move {
        debug!(
            content_type = %upload.content_type,
            file_name = upload.file_name.as_deref().unwrap_or("-"),
            bytes = upload.bytes.len(),
            "Upload accepted"
        );
        match run_job(&state, &job, &upload.bytes).await {
            Ok(file) => {
                info!(
                    token = %job.token,
                    model = %job.model,
                    label = kind.suffix(),
                    "Image {}",
                    kind.suffix()
                );
                Ok(file_response(file, &job.output_file_name(), guard))
            },
            Err(e) => {
                job.discard_input().await;
                job.discard_output().await;
                events::job_failed(&token, &job.model, &e);
                Err(ApiError::from(e).with_context(&format!("Error {} image", kind.action())))
            },
        }
    }
    .instrument(span)
    .await
}

/// Persist, transform, write the output and open it for streaming
async fn run_job(state: &AppState, job: &ProcessingJob, bytes: &[u8]) -> Result<tokio::fs::File> {
    job.write_input(bytes).await?;
    let input = job.read_input().await?;

    let result = state.pool.transform(input, job.model.clone()).await;
    job.discard_input().await;
    let output = result?;

    job.write_output(&output).await?;
    tokio::fs::File::open(&job.output_path)
        .await
        .map_err(|e| ServiceError::file_io_error("open output", &job.output_path, &e))
}

/// Stream `file` back; the job stays registered until the body is dropped
fn file_response(file: tokio::fs::File, file_name: &str, guard: JobGuard) -> Response {
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _in_flight = &guard;
        chunk
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    response
}
