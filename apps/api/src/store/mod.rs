pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod query;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::db::create_pool;
use crate::models::{CrewDraft, CrewField, CrewMember, CrewPatch, FieldValue};
use crate::store::memory::MemoryCrewStore;
use crate::store::pipeline::Pipeline;
use crate::store::postgres::PgCrewStore;
use crate::store::query::{Filter, FindOptions, QueryError};

/// Name under which the crew records are exposed by the metadata endpoints.
pub const COLLECTION: &str = "crew";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("a crew member with this {field} already exists")]
    Duplicate { field: &'static str },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Duplicate { field: "email" }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Database(err),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

impl UpdateResult {
    /// Every matched record receives a fresh `updatedAt`, so matched and
    /// modified always agree.
    pub fn touched(count: u64) -> Self {
        UpdateResult {
            acknowledged: true,
            matched_count: count,
            modified_count: count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

impl DeleteResult {
    pub fn deleted(count: u64) -> Self {
        DeleteResult {
            acknowledged: true,
            deleted_count: count,
        }
    }
}

/// Which version of the record a find-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

impl ReturnDocument {
    pub fn parse(raw: Option<&str>) -> Result<Self, QueryError> {
        match raw {
            None => Ok(ReturnDocument::After),
            Some(s) if s.eq_ignore_ascii_case("after") => Ok(ReturnDocument::After),
            Some(s) if s.eq_ignore_ascii_case("before") => Ok(ReturnDocument::Before),
            Some(other) => Err(QueryError::InvalidParameter {
                name: "returnDocument",
                reason: format!("expected 'before' or 'after', got '{other}'"),
            }),
        }
    }

    pub fn pick(self, before: CrewMember, after: CrewMember) -> CrewMember {
        match self {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
    pub unique: bool,
}

/// Storage and query evaluation over the crew collection.
///
/// Filters always see records in natural (insertion) order; "first match"
/// means first in that order. All methods are safe to call concurrently and
/// resolve conflicting writes last-write-wins.
#[async_trait]
pub trait CrewStore: Send + Sync {
    /// Short backend name reported by `/health`.
    fn backend(&self) -> &'static str;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert(&self, draft: CrewDraft) -> Result<CrewMember, StoreError>;

    /// All-or-nothing batch insert.
    async fn insert_many(&self, drafts: Vec<CrewDraft>) -> Result<Vec<CrewMember>, StoreError>;

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<CrewMember>, StoreError>;

    async fn find_one(&self, filter: &Filter) -> Result<Option<CrewMember>, StoreError> {
        let first = FindOptions::default().with_limit(1);
        Ok(self.find(filter, &first).await?.into_iter().next())
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;

    /// Unique set values of `field`, ascending.
    async fn distinct(&self, field: CrewField) -> Result<Vec<FieldValue>, StoreError>;

    /// Applies `patch` to every match, or to the first one unless `multi`.
    async fn update(
        &self,
        filter: &Filter,
        patch: &CrewPatch,
        multi: bool,
    ) -> Result<UpdateResult, StoreError>;

    /// Replaces the content of the first match, keeping its `id`.
    async fn replace(&self, filter: &Filter, draft: CrewDraft)
        -> Result<UpdateResult, StoreError>;

    async fn delete(&self, filter: &Filter, multi: bool) -> Result<DeleteResult, StoreError>;

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        patch: &CrewPatch,
        returning: ReturnDocument,
    ) -> Result<Option<CrewMember>, StoreError>;

    async fn find_one_and_replace(
        &self,
        filter: &Filter,
        draft: CrewDraft,
        returning: ReturnDocument,
    ) -> Result<Option<CrewMember>, StoreError>;

    async fn find_one_and_delete(&self, filter: &Filter)
        -> Result<Option<CrewMember>, StoreError>;

    /// Leading match stages are evaluated by the backend through
    /// [`CrewStore::find`]; the remaining stages run in process.
    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>, StoreError> {
        let records = self
            .find(&pipeline.pushdown_filter(), &FindOptions::default())
            .await?;
        Ok(pipeline.evaluate(records))
    }

    async fn indexes(&self) -> Result<Vec<IndexInfo>, StoreError>;

    /// Releases the backend's resources. Called once after the server stops.
    async fn close(&self);
}

/// Opens the configured backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn CrewStore>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when STORE_BACKEND=postgres")?;
            let store = PgCrewStore::new(create_pool(url, config.db_max_connections)?);
            match store.ping().await {
                Ok(()) => info!("PostgreSQL record store ready"),
                Err(e) => warn!("PostgreSQL is unreachable, answering 503 until it recovers: {e}"),
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!("Using in-memory record store; data is lost on shutdown");
            Ok(Arc::new(MemoryCrewStore::new()))
        }
    }
}

pub(crate) fn new_id() -> Uuid {
    Uuid::new_v4()
}
