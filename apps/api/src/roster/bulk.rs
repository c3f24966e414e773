use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{CrewPatch, NewCrewMember};
use crate::store::query::Filter;
use crate::store::{CrewStore, StoreError};

/// One item of a bulk write, in document-store wire form, e.g.
/// `{"updateOne": {"filter": {"name": "Kirk"}, "update": {"$set": {"rank": "Admiral"}}}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkOperation {
    InsertOne {
        document: NewCrewMember,
    },
    UpdateOne {
        #[serde(default)]
        filter: Map<String, Value>,
        update: Value,
    },
    UpdateMany {
        #[serde(default)]
        filter: Map<String, Value>,
        update: Value,
    },
    ReplaceOne {
        #[serde(default)]
        filter: Map<String, Value>,
        replacement: NewCrewMember,
    },
    DeleteOne {
        #[serde(default)]
        filter: Map<String, Value>,
    },
    DeleteMany {
        #[serde(default)]
        filter: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkWriteError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub inserted_ids: Vec<Uuid>,
    pub write_errors: Vec<BulkWriteError>,
}

/// Applies `operations` in order. Each item succeeds or fails on its own;
/// failures are recorded with their index and the batch continues.
pub async fn bulk_write(store: &dyn CrewStore, operations: Vec<BulkOperation>) -> BulkWriteResult {
    let mut result = BulkWriteResult::default();
    for (index, operation) in operations.into_iter().enumerate() {
        if let Err(err) = apply(store, operation, &mut result).await {
            warn!("Bulk write item {index} failed: {err}");
            result.write_errors.push(BulkWriteError {
                index,
                message: err.to_string(),
            });
        }
    }
    debug!(
        "Bulk write finished: {} inserted, {} modified, {} deleted, {} failed",
        result.inserted_count,
        result.modified_count,
        result.deleted_count,
        result.write_errors.len()
    );
    result
}

async fn apply(
    store: &dyn CrewStore,
    operation: BulkOperation,
    result: &mut BulkWriteResult,
) -> Result<(), StoreError> {
    match operation {
        BulkOperation::InsertOne { document } => {
            let member = store.insert(document.validate()?).await?;
            result.inserted_count += 1;
            result.inserted_ids.push(member.id);
        }
        BulkOperation::UpdateOne { filter, update } => {
            update_items(store, &filter, update, false, result).await?;
        }
        BulkOperation::UpdateMany { filter, update } => {
            update_items(store, &filter, update, true, result).await?;
        }
        BulkOperation::ReplaceOne {
            filter,
            replacement,
        } => {
            let filter = Filter::from_json(&filter)?;
            let outcome = store.replace(&filter, replacement.validate()?).await?;
            result.matched_count += outcome.matched_count;
            result.modified_count += outcome.modified_count;
        }
        BulkOperation::DeleteOne { filter } => {
            let outcome = store.delete(&Filter::from_json(&filter)?, false).await?;
            result.deleted_count += outcome.deleted_count;
        }
        BulkOperation::DeleteMany { filter } => {
            let outcome = store.delete(&Filter::from_json(&filter)?, true).await?;
            result.deleted_count += outcome.deleted_count;
        }
    }
    Ok(())
}

async fn update_items(
    store: &dyn CrewStore,
    filter: &Map<String, Value>,
    update: Value,
    multi: bool,
    result: &mut BulkWriteResult,
) -> Result<(), StoreError> {
    let filter = Filter::from_json(filter)?;
    let patch = CrewPatch::from_update_document(update)?;
    let outcome = store.update(&filter, &patch, multi).await?;
    result.matched_count += outcome.matched_count;
    result.modified_count += outcome.modified_count;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrewField;
    use crate::store::memory::MemoryCrewStore;
    use crate::store::query::FindOptions;
    use serde_json::json;

    fn ops(value: Value) -> Vec<BulkOperation> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_mixed_batch() {
        let store = MemoryCrewStore::new();
        let result = bulk_write(
            &store,
            ops(json!([
                {"insertOne": {"document": {"name": "Kirk", "age": 35, "email": "k@x", "planet": "Earth"}}},
                {"insertOne": {"document": {"name": "Spock", "age": 40, "email": "s@x", "planet": "Vulcan"}}},
                {"insertOne": {"document": {"name": "Sulu", "age": 30, "email": "h@x", "planet": "Earth"}}},
                {"updateMany": {"filter": {"planet": "Earth"}, "update": {"$set": {"active": true}}}},
                {"updateOne": {"filter": {"name": "Spock"}, "update": {"rank": "Commander"}}},
                {"deleteOne": {"filter": {"name": "Sulu"}}}
            ])),
        )
        .await;

        assert_eq!(result.inserted_count, 3);
        assert_eq!(result.inserted_ids.len(), 3);
        assert_eq!(result.matched_count, 3);
        assert_eq!(result.modified_count, 3);
        assert_eq!(result.deleted_count, 1);
        assert!(result.write_errors.is_empty());
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_per_item() {
        let store = MemoryCrewStore::new();
        let result = bulk_write(
            &store,
            ops(json!([
                {"insertOne": {"document": {"name": "Kirk", "age": 35, "email": "k@x"}}},
                {"insertOne": {"document": {"name": "Clone", "age": 35, "email": "k@x"}}},
                {"deleteMany": {"filter": {"salary": 1}}},
                {"replaceOne": {"filter": {"name": "Kirk"}, "replacement": {"name": "Picard", "age": 59, "email": "p@x"}}}
            ])),
        )
        .await;

        let failed: Vec<_> = result.write_errors.iter().map(|e| e.index).collect();
        assert_eq!(failed, [1, 2]);
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.modified_count, 1);

        let names: Vec<_> = store
            .find(&Filter::all(), &FindOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, ["Picard"]);
        assert_eq!(store.distinct(CrewField::Email).await.unwrap().len(), 1);
    }
}
