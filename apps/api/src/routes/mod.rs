pub mod health;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::errors::AppError;
use crate::roster::handlers;
use crate::state::AppState;

/// Administrative collection operations are deliberately not exposed.
async fn not_implemented() -> Result<(), AppError> {
    Err(AppError::NotImplemented)
}

fn crew_routes() -> Router<AppState> {
    Router::new()
        // Create
        .route("/insert", post(handlers::handle_insert))
        .route("/insertMany", post(handlers::handle_insert_many))
        // Read
        .route("/find", get(handlers::handle_find))
        .route("/findOne", get(handlers::handle_find_one))
        .route("/limit", get(handlers::handle_limit))
        .route("/skip", get(handlers::handle_skip))
        .route("/sort", get(handlers::handle_sort))
        .route("/distinct/:field", get(handlers::handle_distinct))
        .route("/count", get(handlers::handle_count))
        // Update
        .route("/updateOne", put(handlers::handle_update_one))
        .route("/updateMany", put(handlers::handle_update_many))
        .route("/replaceOne", put(handlers::handle_replace_one))
        // Delete
        .route("/deleteOne", delete(handlers::handle_delete_one))
        .route("/deleteMany", delete(handlers::handle_delete_many))
        // Find-and-modify
        .route(
            "/findOneAndUpdate",
            put(handlers::handle_find_one_and_update),
        )
        .route(
            "/findOneAndReplace",
            put(handlers::handle_find_one_and_replace),
        )
        .route(
            "/findOneAndDelete",
            delete(handlers::handle_find_one_and_delete),
        )
        .route("/bulkWrite", post(handlers::handle_bulk_write))
        // Aggregates and dashboard composites
        .route("/aggregate", get(handlers::handle_aggregate))
        .route("/top", get(handlers::handle_top))
        .route("/topPlanets", get(handlers::handle_top_planets))
        .route("/recent", get(handlers::handle_recent))
        .route("/search", get(handlers::handle_search))
        .route("/filter", get(handlers::handle_filter))
        .route("/export", get(handlers::handle_export))
        // Store metadata
        .route("/collections", get(handlers::handle_collections))
        .route("/indexes", get(handlers::handle_indexes))
        .route("/dropIndex", delete(not_implemented))
        .route("/dropCollection", delete(not_implemented))
        .route("/renameCollection", post(not_implemented))
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/", get(health::root_handler))
        .route("/health", get(health::health_handler));

    let router = if state.config.api_prefix.is_empty() {
        router.merge(crew_routes())
    } else {
        router.nest(&state.config.api_prefix, crew_routes())
    };

    router.with_state(state)
}
