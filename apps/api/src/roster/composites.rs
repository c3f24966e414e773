//! Dashboard composites and derived queries. Each is a single store call
//! with a fixed filter, sort, limit or pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{CrewField, CrewMember, FieldValue};
use crate::store::pipeline::{Pipeline, Stage};
use crate::store::query::{Filter, FindOptions, QueryError, Sort, SortDirection};
use crate::store::{CrewStore, StoreError};

pub const TOP_CREW_LIMIT: u64 = 10;
pub const TOP_PLANETS_LIMIT: usize = 5;
pub const RECENT_LIMIT: u64 = 5;
pub const ADULT_AGE: i64 = 18;

/// Fields searched by [`search`].
pub const SEARCH_FIELDS: [CrewField; 3] = [CrewField::Name, CrewField::Rank, CrewField::Planet];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentActivity {
    pub id: Uuid,
    pub name: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl From<CrewMember> for RecentActivity {
    fn from(member: CrewMember) -> Self {
        let rank = member.rank.as_deref().unwrap_or_default();
        RecentActivity {
            id: member.id,
            action: format!("{rank} {} updated", member.name).trim_start().to_string(),
            name: member.name,
            timestamp: member.updated_at,
        }
    }
}

/// Active crew, highest rank first then by name.
pub async fn top_crew(store: &dyn CrewStore) -> Result<Vec<CrewMember>, StoreError> {
    let active = Filter::all().eq(CrewField::Active, FieldValue::Bool(true));
    let options = FindOptions::sorted(
        Sort::by(CrewField::Rank, SortDirection::Desc).then(CrewField::Name, SortDirection::Asc),
    )
    .with_limit(TOP_CREW_LIMIT);
    store.find(&active, &options).await
}

pub fn top_planets_pipeline() -> Result<Pipeline, QueryError> {
    Pipeline::new(vec![
        Stage::Group {
            by: CrewField::Planet,
            count_as: "count".to_string(),
        },
        Stage::Sort(vec![("count".to_string(), SortDirection::Desc)]),
        Stage::Limit(TOP_PLANETS_LIMIT),
    ])
}

/// Planets by crew count, largest first.
pub async fn top_planets(store: &dyn CrewStore) -> Result<Vec<Value>, StoreError> {
    store.aggregate(&top_planets_pipeline()?).await
}

pub fn adult_census_pipeline() -> Result<Pipeline, QueryError> {
    Pipeline::new(vec![
        Stage::Match(Filter::all().gte(CrewField::Age, FieldValue::Int(ADULT_AGE))),
        Stage::Group {
            by: CrewField::Planet,
            count_as: "total".to_string(),
        },
    ])
}

/// Adult crew per planet.
pub async fn adult_census(store: &dyn CrewStore) -> Result<Vec<Value>, StoreError> {
    store.aggregate(&adult_census_pipeline()?).await
}

/// Most recently modified records as activity entries.
pub async fn recent_activity(store: &dyn CrewStore) -> Result<Vec<RecentActivity>, StoreError> {
    let options = FindOptions::sorted(Sort::by(CrewField::UpdatedAt, SortDirection::Desc))
        .with_limit(RECENT_LIMIT);
    let records = store.find(&Filter::all(), &options).await?;
    Ok(records.into_iter().map(RecentActivity::from).collect())
}

/// Case-insensitive substring search over name, rank and planet.
pub async fn search(store: &dyn CrewStore, query: &str) -> Result<Vec<CrewMember>, StoreError> {
    if query.trim().is_empty() {
        return Err(StoreError::Validation("Search query is required".to_string()));
    }
    let filter = Filter::all().contains_any(&SEARCH_FIELDS, query);
    store.find(&filter, &FindOptions::default()).await
}

/// Exact match on planet and rank; empty or absent values are unconstrained.
pub async fn filter_by(
    store: &dyn CrewStore,
    planet: Option<&str>,
    rank: Option<&str>,
) -> Result<Vec<CrewMember>, StoreError> {
    let mut filter = Filter::all();
    for (field, value) in [(CrewField::Planet, planet), (CrewField::Rank, rank)] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            filter = filter.eq(field, FieldValue::Text(value.to_string()));
        }
    }
    store.find(&filter, &FindOptions::default()).await
}
