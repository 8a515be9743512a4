//! Handlers for the `/job` resource.
//!
//! Submission streams the uploaded raster into the job's input folder and
//! queues the job; the scheduler picks it up from the store. Status and
//! download read back what the scheduler recorded.

use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ditchnet_core::error::CoreError;
use ditchnet_core::job::{JobId, ModelVariant, NewJob};
use ditchnet_core::paths::JobPaths;
use ditchnet_core::status::status_report;
use ditchnet_core::upload::{ensure_tiff, validate_content_type, TIFF_CONTENT_TYPE};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Multipart field carrying the model selector.
const MODEL_FIELD: &str = "model";

/// Multipart field carrying the input raster.
const INPUT_FIELD: &str = "input";

/// Bytes collected before the upload is checked for a TIFF header.
const SNIFF_LEN: usize = 8;

/// Body of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid job id")))
}

/// What a submission form contained once the input was on disk.
struct Upload {
    model: ModelVariant,
    original_filename: String,
}

/// Read the form, streaming the `input` field into `paths.input_file`.
///
/// Fields may arrive in any order. Unknown fields are ignored.
async fn receive_upload(mut multipart: Multipart, paths: &JobPaths) -> AppResult<Upload> {
    let mut model: Option<ModelVariant> = None;
    let mut original_filename: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            MODEL_FIELD => {
                let text = field.text().await?;
                model = Some(text.parse()?);
            }
            INPUT_FIELD => {
                if original_filename.is_some() {
                    return Err(AppError::BadRequest(format!(
                        "Only one '{INPUT_FIELD}' file may be uploaded"
                    )));
                }
                validate_content_type(field.content_type())?;
                let filename = field
                    .file_name()
                    .filter(|f| !f.is_empty())
                    .unwrap_or("target.tif")
                    .to_string();
                paths
                    .prepare()
                    .await
                    .map_err(|e| AppError::InternalError(format!("create job folders: {e}")))?;
                write_input(field, paths).await?;
                original_filename = Some(filename);
            }
            _ => {} // ignore unknown fields
        }
    }

    let model = model.ok_or_else(|| {
        CoreError::Validation(format!("Missing required '{MODEL_FIELD}' field"))
    })?;
    let original_filename = original_filename.ok_or_else(|| {
        CoreError::Validation(format!("Missing required '{INPUT_FIELD}' file"))
    })?;

    Ok(Upload {
        model,
        original_filename,
    })
}

/// Stream one file field to disk, rejecting it once its leading bytes show
/// it is not a TIFF.
async fn write_input(mut field: Field<'_>, paths: &JobPaths) -> AppResult<u64> {
    let mut file = tokio::fs::File::create(&paths.input_file)
        .await
        .map_err(|e| AppError::InternalError(format!("create input file: {e}")))?;

    let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
    let mut sniffed = false;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        if !sniffed {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            if head.len() == SNIFF_LEN {
                ensure_tiff(&head)?;
                sniffed = true;
            }
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(format!("write input file: {e}")))?;
        written += chunk.len() as u64;
    }
    if !sniffed {
        ensure_tiff(&head)?;
    }

    file.flush()
        .await
        .map_err(|e| AppError::InternalError(format!("flush input file: {e}")))?;
    Ok(written)
}

/// Remove a half-created job folder. Failures are logged; the request has
/// already failed for another reason.
async fn discard(id: JobId, paths: &JobPaths) {
    if let Err(e) = paths.remove().await {
        tracing::warn!(job_id = %id, error = %e, "Failed to remove rejected job folder");
    }
}

/// `Content-Disposition` value naming the download after the uploaded file.
fn attachment_header(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /job
///
/// Multipart form with a `model` field (`1` for 0.5 m, `2` for 1 m) and an
/// `input` GeoTIFF. Returns 201 with the new job id; the job starts Queued.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let id = JobId::new();
    let paths = state.storage.job(id);

    let upload = match receive_upload(multipart, &paths).await {
        Ok(upload) => upload,
        Err(e) => {
            discard(id, &paths).await;
            return Err(e);
        }
    };

    let job = NewJob {
        id,
        model_variant: upload.model,
        original_filename: upload.original_filename,
    };
    if let Err(e) = state.store.insert(&job).await {
        tracing::error!(job_id = %id, error = %e, "Failed to queue job");
        discard(id, &paths).await;
        return Err(e.into());
    }

    tracing::info!(
        job_id = %id,
        model = job.model_variant.id(),
        filename = %job.original_filename,
        "Job submitted",
    );

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: SubmittedJob { job_id: id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /job/{id}
///
/// Current state, with the queue position for queued jobs. Unknown ids are
/// reported with state `not_found` rather than as an error.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_job_id(&id)?;
    let report = status_report(state.store.as_ref(), id).await?;
    Ok(Json(DataResponse { data: report }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /job/{id}/download
///
/// Streams the processed raster as an attachment named after the uploaded
/// file. 404 until the output exists.
pub async fn download_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = parse_job_id(&id)?;
    let job = state.store.get(id).await?.ok_or(CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    })?;

    let paths = state.storage.job(id);
    let file = match tokio::fs::File::open(&paths.output_file).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::NotFound {
                entity: "Output",
                id: id.to_string(),
            }
            .into());
        }
        Err(e) => return Err(AppError::InternalError(format!("open output: {e}"))),
    };
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    tracing::debug!(job_id = %id, file_size, "Serving job output");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, TIFF_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            attachment_header(&job.original_filename),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn attachment_header_quotes_filename() {
        assert_eq!(
            attachment_header("area 51.tif"),
            "attachment; filename=\"area 51.tif\""
        );
        assert_eq!(
            attachment_header("a\"b/c.tif"),
            "attachment; filename=\"a_b_c.tif\""
        );
    }

    #[test]
    fn malformed_job_id_is_a_bad_request() {
        assert_matches!(parse_job_id("not-a-uuid"), Err(AppError::BadRequest(_)));
        assert!(parse_job_id("67e55044-10b1-426f-9247-bb680e5fe0c8").is_ok());
    }
}
