//! The browser front end: `index.html` at `/` and bundled files under
//! `/assets`.

use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;

pub fn router(assets_path: &Path) -> Router<AppState> {
    Router::new()
        .route_service("/", ServeFile::new(assets_path.join("index.html")))
        .nest_service("/assets", ServeDir::new(assets_path.join("assets")))
}
