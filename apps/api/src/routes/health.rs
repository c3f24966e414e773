use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /
/// Liveness message.
pub async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Crew roster API is running" }))
}

/// GET /health
/// Always answers 200; `store` reports whether the record store responds.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let store = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::warn!("Health check could not reach the store: {e}");
            "disconnected"
        }
    };
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "store": store,
        "backend": state.store.backend(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
