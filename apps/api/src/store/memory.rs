use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{CrewDraft, CrewField, CrewMember, CrewPatch, FieldValue};
use crate::store::query::{Filter, FindOptions};
use crate::store::{
    new_id, CrewStore, DeleteResult, IndexInfo, ReturnDocument, StoreError, UpdateResult,
};

/// Process-local store. Records live in a vector in insertion order, which is
/// the natural order every filter observes.
#[derive(Default)]
pub struct MemoryCrewStore {
    inner: RwLock<Collection>,
}

impl MemoryCrewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct Collection {
    records: Vec<CrewMember>,
    last_touch: Option<DateTime<Utc>>,
}

impl Collection {
    /// Strictly increasing mutation timestamps, so recency ordering never ties.
    fn touch(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let now = match self.last_touch {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_touch = Some(now);
        now
    }

    fn positions(&self, filter: &Filter, multi: bool) -> Vec<usize> {
        let matches = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, m)| filter.matches(m))
            .map(|(i, _)| i);
        if multi {
            matches.collect()
        } else {
            matches.take(1).collect()
        }
    }

    /// Fails if `email` is held by any record outside `targets`.
    fn ensure_email_free(&self, email: &str, targets: &[usize]) -> Result<(), StoreError> {
        let taken = self
            .records
            .iter()
            .enumerate()
            .any(|(i, m)| m.email == email && !targets.contains(&i));
        if taken {
            return Err(StoreError::Duplicate { field: "email" });
        }
        Ok(())
    }

    fn check_patch(&self, patch: &CrewPatch, targets: &[usize]) -> Result<(), StoreError> {
        patch.validate()?;
        if let Some(email) = &patch.email {
            if targets.len() > 1 {
                return Err(StoreError::Duplicate { field: "email" });
            }
            self.ensure_email_free(email, targets)?;
        }
        Ok(())
    }

    fn insert(&mut self, draft: CrewDraft) -> CrewMember {
        let now = self.touch();
        let member = CrewMember::from_draft(new_id(), draft, now);
        self.records.push(member.clone());
        member
    }

    fn patch(&mut self, targets: &[usize], patch: &CrewPatch) {
        let now = self.touch();
        for &i in targets {
            patch.apply(&mut self.records[i], now);
        }
    }

    fn replace(&mut self, target: usize, draft: CrewDraft) {
        let now = self.touch();
        self.records[target].replace_with(draft, now);
    }
}

#[async_trait]
impl CrewStore for MemoryCrewStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, draft: CrewDraft) -> Result<CrewMember, StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_email_free(&draft.email, &[])?;
        let member = inner.insert(draft);
        debug!("Inserted crew member {}", member.id);
        Ok(member)
    }

    async fn insert_many(&self, drafts: Vec<CrewDraft>) -> Result<Vec<CrewMember>, StoreError> {
        let mut inner = self.inner.write().await;
        for (i, draft) in drafts.iter().enumerate() {
            inner.ensure_email_free(&draft.email, &[])?;
            if drafts[..i].iter().any(|d| d.email == draft.email) {
                return Err(StoreError::Duplicate { field: "email" });
            }
        }
        let inserted: Vec<_> = drafts.into_iter().map(|d| inner.insert(d)).collect();
        debug!("Inserted {} crew members", inserted.len());
        Ok(inserted)
    }

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<CrewMember>, StoreError> {
        let inner = self.inner.read().await;
        let mut records: Vec<_> = inner
            .records
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        options.paginate(&mut records);
        Ok(records)
    }

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.iter().filter(|m| filter.matches(m)).count() as u64)
    }

    async fn distinct(&self, field: CrewField) -> Result<Vec<FieldValue>, StoreError> {
        let inner = self.inner.read().await;
        let mut values: Vec<FieldValue> = inner
            .records
            .iter()
            .filter_map(|m| m.value_of(field))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        values.dedup();
        Ok(values)
    }

    async fn update(
        &self,
        filter: &Filter,
        patch: &CrewPatch,
        multi: bool,
    ) -> Result<UpdateResult, StoreError> {
        patch.validate()?;
        let mut inner = self.inner.write().await;
        let targets = inner.positions(filter, multi);
        if targets.is_empty() {
            return Ok(UpdateResult::touched(0));
        }
        inner.check_patch(patch, &targets)?;
        inner.patch(&targets, patch);
        debug!("Updated {} crew members", targets.len());
        Ok(UpdateResult::touched(targets.len() as u64))
    }

    async fn replace(
        &self,
        filter: &Filter,
        draft: CrewDraft,
    ) -> Result<UpdateResult, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(&target) = inner.positions(filter, false).first() else {
            return Ok(UpdateResult::touched(0));
        };
        inner.ensure_email_free(&draft.email, &[target])?;
        inner.replace(target, draft);
        Ok(UpdateResult::touched(1))
    }

    async fn delete(&self, filter: &Filter, multi: bool) -> Result<DeleteResult, StoreError> {
        let mut inner = self.inner.write().await;
        let targets = inner.positions(filter, multi);
        // Highest index first keeps the remaining positions valid.
        for &i in targets.iter().rev() {
            inner.records.remove(i);
        }
        debug!("Deleted {} crew members", targets.len());
        Ok(DeleteResult::deleted(targets.len() as u64))
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        patch: &CrewPatch,
        returning: ReturnDocument,
    ) -> Result<Option<CrewMember>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(&target) = inner.positions(filter, false).first() else {
            return Ok(None);
        };
        inner.check_patch(patch, &[target])?;
        let before = inner.records[target].clone();
        inner.patch(&[target], patch);
        Ok(Some(returning.pick(before, inner.records[target].clone())))
    }

    async fn find_one_and_replace(
        &self,
        filter: &Filter,
        draft: CrewDraft,
        returning: ReturnDocument,
    ) -> Result<Option<CrewMember>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(&target) = inner.positions(filter, false).first() else {
            return Ok(None);
        };
        inner.ensure_email_free(&draft.email, &[target])?;
        let before = inner.records[target].clone();
        inner.replace(target, draft);
        Ok(Some(returning.pick(before, inner.records[target].clone())))
    }

    async fn find_one_and_delete(
        &self,
        filter: &Filter,
    ) -> Result<Option<CrewMember>, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .positions(filter, false)
            .first()
            .map(|&i| inner.records.remove(i));
        Ok(removed)
    }

    async fn indexes(&self) -> Result<Vec<IndexInfo>, StoreError> {
        Ok(vec![
            IndexInfo {
                name: "crew_id_key".to_string(),
                definition: "UNIQUE (id)".to_string(),
                unique: true,
            },
            IndexInfo {
                name: "crew_email_key".to_string(),
                definition: "UNIQUE (email)".to_string(),
                unique: true,
            },
        ])
    }

    async fn close(&self) {
        let inner = self.inner.read().await;
        debug!("Closing in-memory store with {} records", inner.records.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewCrewMember;
    use crate::store::pipeline::{Pipeline, Stage};
    use crate::store::query::{Sort, SortDirection};
    use serde_json::json;

    fn draft(name: &str, planet: &str, email: &str) -> CrewDraft {
        NewCrewMember {
            name: Some(name.to_string()),
            age: Some(30),
            planet: Some(planet.to_string()),
            email: Some(email.to_string()),
            rank: Some("Ensign".to_string()),
            active: Some(true),
            minor: None,
        }
        .validate()
        .unwrap()
    }

    fn kirk() -> CrewDraft {
        CrewDraft {
            name: "Kirk".to_string(),
            age: 35,
            planet: Some("Earth".to_string()),
            email: "k@x.com".to_string(),
            rank: Some("Captain".to_string()),
            active: Some(true),
            minor: None,
        }
    }

    fn by_planet(planet: &str) -> Filter {
        Filter::all().eq(CrewField::Planet, FieldValue::Text(planet.to_string()))
    }

    #[tokio::test]
    async fn test_kirk_scenario() {
        let store = MemoryCrewStore::new();
        store.insert(kirk()).await.unwrap();

        let active = Filter::all().eq(CrewField::Active, FieldValue::Bool(true));
        let found = store.find(&active, &FindOptions::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Kirk");
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 1);
        assert_eq!(
            store.distinct(CrewField::Planet).await.unwrap(),
            vec![FieldValue::Text("Earth".to_string())]
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_leaves_original() {
        let store = MemoryCrewStore::new();
        let original = store.insert(kirk()).await.unwrap();

        let mut dup = draft("Impostor", "Mars", "k@x.com");
        dup.age = 99;
        let err = store.insert(dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { field: "email" }));

        let all = store.find(&Filter::all(), &FindOptions::default()).await.unwrap();
        assert_eq!(all, vec![original]);
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let store = MemoryCrewStore::new();
        let err = store
            .insert_many(vec![draft("A", "Earth", "a@x"), draft("B", "Earth", "a@x")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_all_is_stable_insertion_order() {
        let store = MemoryCrewStore::new();
        for (i, planet) in ["Earth", "Mars", "Vulcan"].iter().enumerate() {
            store
                .insert(draft(&format!("c{i}"), planet, &format!("c{i}@x")))
                .await
                .unwrap();
        }
        let first = store.find(&Filter::all(), &FindOptions::default()).await.unwrap();
        let second = store.find(&Filter::all(), &FindOptions::default()).await.unwrap();
        let names: Vec<_> = first.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["c0", "c1", "c2"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_one_vs_many() {
        let store = MemoryCrewStore::new();
        for i in 0..3 {
            store
                .insert(draft(&format!("m{i}"), "Mars", &format!("m{i}@x")))
                .await
                .unwrap();
        }
        let promote = CrewPatch {
            rank: Some("Lieutenant".to_string()),
            ..Default::default()
        };
        let lieutenants = Filter::all().eq(CrewField::Rank, FieldValue::Text("Lieutenant".into()));

        let one = store.update(&by_planet("Mars"), &promote, false).await.unwrap();
        assert_eq!(one.matched_count, 1);
        assert_eq!(store.count(&lieutenants).await.unwrap(), 1);

        let many = store.update(&by_planet("Mars"), &promote, true).await.unwrap();
        assert_eq!(many.matched_count, 3);
        assert_eq!(store.count(&lieutenants).await.unwrap(), 3);

        let none = store.update(&by_planet("Pluto"), &promote, true).await.unwrap();
        assert_eq!(none, UpdateResult::touched(0));
    }

    #[tokio::test]
    async fn test_update_many_cannot_share_email() {
        let store = MemoryCrewStore::new();
        store.insert(draft("A", "Mars", "a@x")).await.unwrap();
        store.insert(draft("B", "Mars", "b@x")).await.unwrap();
        let patch = CrewPatch {
            email: Some("same@x".to_string()),
            ..Default::default()
        };
        assert!(store.update(&by_planet("Mars"), &patch, true).await.is_err());
        assert!(store.update(&by_planet("Mars"), &patch, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_without_matches_ignores_taken_email() {
        let store = MemoryCrewStore::new();
        store.insert(draft("A", "Mars", "a@x")).await.unwrap();
        let patch = CrewPatch {
            email: Some("a@x".to_string()),
            ..Default::default()
        };

        for multi in [false, true] {
            let result = store.update(&by_planet("Pluto"), &patch, multi).await.unwrap();
            assert_eq!(result.matched_count, 0);
            assert_eq!(result.modified_count, 0);
        }
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_find_is_empty() {
        let store = MemoryCrewStore::new();
        store.insert(draft("A", "Mars", "a@x")).await.unwrap();
        store.insert(draft("B", "Mars", "b@x")).await.unwrap();
        store.insert(draft("C", "Earth", "c@x")).await.unwrap();

        let one = store.delete(&by_planet("Mars"), false).await.unwrap();
        assert_eq!(one.deleted_count, 1);
        let many = store.delete(&by_planet("Mars"), true).await.unwrap();
        assert_eq!(many.deleted_count, 1);
        assert!(store
            .find(&by_planet("Mars"), &FindOptions::default())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count(&Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_keeps_id() {
        let store = MemoryCrewStore::new();
        let original = store.insert(kirk()).await.unwrap();
        let result = store
            .replace(&by_planet("Earth"), draft("Picard", "France", "jl@x"))
            .await
            .unwrap();
        assert_eq!(result.modified_count, 1);

        let replaced = store.find_one(&Filter::all()).await.unwrap().unwrap();
        assert_eq!(replaced.id, original.id);
        assert_eq!(replaced.name, "Picard");
        assert!(replaced.updated_at > original.updated_at);
    }

    #[tokio::test]
    async fn test_find_one_and_update_returns_requested_version() {
        let store = MemoryCrewStore::new();
        store.insert(kirk()).await.unwrap();
        let patch = CrewPatch {
            rank: Some("Admiral".to_string()),
            ..Default::default()
        };

        let before = store
            .find_one_and_update(&Filter::all(), &patch, ReturnDocument::Before)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.rank.as_deref(), Some("Captain"));

        let after = store
            .find_one_and_update(&Filter::all(), &patch, ReturnDocument::After)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.rank.as_deref(), Some("Admiral"));

        let missing = store
            .find_one_and_update(&by_planet("Qo'noS"), &patch, ReturnDocument::After)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_find_one_and_delete() {
        let store = MemoryCrewStore::new();
        let kirk = store.insert(kirk()).await.unwrap();
        let removed = store.find_one_and_delete(&Filter::all()).await.unwrap();
        assert_eq!(removed, Some(kirk));
        assert_eq!(store.find_one_and_delete(&Filter::all()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_aggregate_top_planets() {
        let store = MemoryCrewStore::new();
        store.insert(draft("A", "Earth", "a@x")).await.unwrap();
        store.insert(draft("B", "Mars", "b@x")).await.unwrap();
        store.insert(draft("C", "Mars", "c@x")).await.unwrap();

        let pipeline = Pipeline::new(vec![
            Stage::Group {
                by: CrewField::Planet,
                count_as: "count".to_string(),
            },
            Stage::Sort(vec![("count".to_string(), SortDirection::Desc)]),
            Stage::Limit(5),
        ])
        .unwrap();
        let rows = store.aggregate(&pipeline).await.unwrap();
        assert_eq!(rows[0], json!({"planet": "Mars", "count": 2}));
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_updated_at_strictly_increases() {
        let store = MemoryCrewStore::new();
        store.insert(draft("A", "Earth", "a@x")).await.unwrap();
        store.insert(draft("B", "Earth", "b@x")).await.unwrap();
        let recent = store
            .find(
                &Filter::all(),
                &FindOptions::sorted(Sort::by(CrewField::UpdatedAt, SortDirection::Desc)),
            )
            .await
            .unwrap();
        assert_eq!(recent[0].name, "B");
    }
}
