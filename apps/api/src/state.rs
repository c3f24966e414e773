use std::sync::Arc;

use crate::config::Config;
use crate::store::CrewStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Record store handle, opened in `main` and closed after shutdown.
    pub store: Arc<dyn CrewStore>,
    pub config: Config,
}
