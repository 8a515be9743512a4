use std::sync::Arc;

use ditchnet_core::paths::StorageRoot;
use ditchnet_core::store::JobStore;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Job table shared with the scheduler.
    pub store: Arc<dyn JobStore>,
    /// Root of the per-job folders.
    pub storage: StorageRoot,
}
