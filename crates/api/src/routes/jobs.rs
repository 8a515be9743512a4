//! Route definitions for the `/job` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/job`.
///
/// ```text
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job_status
/// GET    /{id}/download   -> download_output
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job_status))
        .route("/{id}/download", get(jobs::download_output))
}
