use std::collections::HashMap;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{CrewField, CrewMember, CrewPatch, NewCrewMember};
use crate::roster::bulk::{bulk_write, BulkOperation, BulkWriteResult};
use crate::roster::composites::{self, RecentActivity};
use crate::roster::export::{render_csv, CSV_FILENAME};
use crate::store::query::{parse_count, Filter, FindOptions, Projection, Sort};
use crate::store::{DeleteResult, IndexInfo, ReturnDocument, UpdateResult, COLLECTION};
use crate::state::AppState;

type Params = HashMap<String, String>;

/// Query parameters that shape a find rather than filter it.
const FIELDS_PARAM: &str = "fields";
const RETURN_DOCUMENT_PARAM: &str = "returnDocument";

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Splits the optional `fields` projection out of the filter parameters.
fn filter_and_projection(mut params: Params) -> Result<(Filter, FindOptions), AppError> {
    let mut options = FindOptions::default();
    if let Some(raw) = params.remove(FIELDS_PARAM) {
        options = options.with_projection(Projection::parse(&raw)?);
    }
    Ok((Filter::from_params(&params)?, options))
}

/// POST /insert
pub async fn handle_insert(
    State(state): State<AppState>,
    payload: Result<Json<NewCrewMember>, JsonRejection>,
) -> Result<Json<CrewMember>, AppError> {
    let Json(body) = payload?;
    let member = state.store.insert(body.validate()?).await?;
    Ok(Json(member))
}

/// POST /insertMany
pub async fn handle_insert_many(
    State(state): State<AppState>,
    payload: Result<Json<Vec<NewCrewMember>>, JsonRejection>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let Json(body) = payload?;
    let drafts = body
        .into_iter()
        .map(NewCrewMember::validate)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(state.store.insert_many(drafts).await?))
}

/// GET /find
pub async fn handle_find(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<Value>>, AppError> {
    let (filter, options) = filter_and_projection(params)?;
    let records = state.store.find(&filter, &options).await?;
    Ok(Json(options.project(&records)?))
}

/// GET /findOne
pub async fn handle_find_one(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Option<Value>>, AppError> {
    let (filter, options) = filter_and_projection(params)?;
    let found = state.store.find_one(&filter).await?;
    let projected = match found {
        Some(member) => options.project(std::slice::from_ref(&member))?.pop(),
        None => None,
    };
    Ok(Json(projected))
}

/// GET /limit?n=
pub async fn handle_limit(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let n = parse_count("n", params.get("n"))?;
    let options = FindOptions::default().with_limit(n);
    Ok(Json(state.store.find(&Filter::all(), &options).await?))
}

/// GET /skip?n=
pub async fn handle_skip(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let n = parse_count("n", params.get("n"))?;
    let options = FindOptions::default().with_skip(n);
    Ok(Json(state.store.find(&Filter::all(), &options).await?))
}

/// GET /sort?sort={"field": 1|-1}
pub async fn handle_sort(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let raw = params
        .get("sort")
        .ok_or_else(|| AppError::Validation("sort parameter is required".to_string()))?;
    let options = FindOptions::sorted(Sort::parse_json(raw)?);
    Ok(Json(state.store.find(&Filter::all(), &options).await?))
}

/// GET /distinct/:field
pub async fn handle_distinct(
    State(state): State<AppState>,
    Path(field): Path<String>,
) -> Result<Json<Vec<Value>>, AppError> {
    let field = CrewField::parse(&field)?;
    let values = state.store.distinct(field).await?;
    Ok(Json(values.iter().map(|v| v.to_json()).collect()))
}

/// GET /count
pub async fn handle_count(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<CountResponse>, AppError> {
    let filter = Filter::from_params(&params)?;
    let count = state.store.count(&filter).await?;
    Ok(Json(CountResponse { count }))
}

async fn update(
    state: AppState,
    params: Params,
    payload: Result<Json<Value>, JsonRejection>,
    multi: bool,
) -> Result<Json<UpdateResult>, AppError> {
    let Json(body) = payload?;
    let filter = Filter::from_params(&params)?;
    let patch = CrewPatch::from_update_document(body)?;
    Ok(Json(state.store.update(&filter, &patch, multi).await?))
}

/// PUT /updateOne?<filter>
pub async fn handle_update_one(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateResult>, AppError> {
    update(state, params, payload, false).await
}

/// PUT /updateMany?<filter>
pub async fn handle_update_many(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdateResult>, AppError> {
    update(state, params, payload, true).await
}

/// PUT /replaceOne?<filter>
pub async fn handle_replace_one(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    payload: Result<Json<NewCrewMember>, JsonRejection>,
) -> Result<Json<UpdateResult>, AppError> {
    let Json(body) = payload?;
    let filter = Filter::from_params(&params)?;
    Ok(Json(state.store.replace(&filter, body.validate()?).await?))
}

/// DELETE /deleteOne?<filter>
pub async fn handle_delete_one(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<DeleteResult>, AppError> {
    let filter = Filter::from_params(&params)?;
    Ok(Json(state.store.delete(&filter, false).await?))
}

/// DELETE /deleteMany?<filter>
pub async fn handle_delete_many(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<DeleteResult>, AppError> {
    let filter = Filter::from_params(&params)?;
    Ok(Json(state.store.delete(&filter, true).await?))
}

fn split_return_document(mut params: Params) -> Result<(Filter, ReturnDocument), AppError> {
    let returning = ReturnDocument::parse(params.remove(RETURN_DOCUMENT_PARAM).as_deref())?;
    Ok((Filter::from_params(&params)?, returning))
}

/// PUT /findOneAndUpdate?<filter>[&returnDocument=before|after]
pub async fn handle_find_one_and_update(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Option<CrewMember>>, AppError> {
    let Json(body) = payload?;
    let (filter, returning) = split_return_document(params)?;
    let patch = CrewPatch::from_update_document(body)?;
    Ok(Json(
        state
            .store
            .find_one_and_update(&filter, &patch, returning)
            .await?,
    ))
}

/// PUT /findOneAndReplace?<filter>[&returnDocument=before|after]
pub async fn handle_find_one_and_replace(
    State(state): State<AppState>,
    Query(params): Query<Params>,
    payload: Result<Json<NewCrewMember>, JsonRejection>,
) -> Result<Json<Option<CrewMember>>, AppError> {
    let Json(body) = payload?;
    let (filter, returning) = split_return_document(params)?;
    Ok(Json(
        state
            .store
            .find_one_and_replace(&filter, body.validate()?, returning)
            .await?,
    ))
}

/// DELETE /findOneAndDelete?<filter>
pub async fn handle_find_one_and_delete(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Option<CrewMember>>, AppError> {
    let filter = Filter::from_params(&params)?;
    Ok(Json(state.store.find_one_and_delete(&filter).await?))
}

/// POST /bulkWrite
pub async fn handle_bulk_write(
    State(state): State<AppState>,
    payload: Result<Json<Vec<BulkOperation>>, JsonRejection>,
) -> Result<Json<BulkWriteResult>, AppError> {
    let Json(operations) = payload?;
    Ok(Json(bulk_write(state.store.as_ref(), operations).await))
}

/// GET /aggregate
pub async fn handle_aggregate(
    State(state): State<AppState>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(composites::adult_census(state.store.as_ref()).await?))
}

/// GET /top
pub async fn handle_top(
    State(state): State<AppState>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    Ok(Json(composites::top_crew(state.store.as_ref()).await?))
}

/// GET /topPlanets
pub async fn handle_top_planets(
    State(state): State<AppState>,
) -> Result<Json<Vec<Value>>, AppError> {
    Ok(Json(composites::top_planets(state.store.as_ref()).await?))
}

/// GET /recent
pub async fn handle_recent(
    State(state): State<AppState>,
) -> Result<Json<Vec<RecentActivity>>, AppError> {
    Ok(Json(composites::recent_activity(state.store.as_ref()).await?))
}

/// GET /search?query=
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let query = params.get("query").map(String::as_str).unwrap_or_default();
    Ok(Json(composites::search(state.store.as_ref(), query).await?))
}

/// GET /filter?planet=&rank=
pub async fn handle_filter(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CrewMember>>, AppError> {
    let planet = params.get("planet").map(String::as_str);
    let rank = params.get("rank").map(String::as_str);
    Ok(Json(
        composites::filter_by(state.store.as_ref(), planet, rank).await?,
    ))
}

/// GET /export
pub async fn handle_export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let records = state
        .store
        .find(&Filter::all(), &FindOptions::default())
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={CSV_FILENAME}"),
            ),
        ],
        render_csv(&records),
    ))
}

/// GET /collections
pub async fn handle_collections() -> Json<Value> {
    Json(json!([{ "name": COLLECTION, "type": "collection" }]))
}

/// GET /indexes
pub async fn handle_indexes(
    State(state): State<AppState>,
) -> Result<Json<Vec<IndexInfo>>, AppError> {
    Ok(Json(state.store.indexes().await?))
}
