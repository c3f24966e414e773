use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::store::query::QueryError;
use crate::store::StoreError;

/// A stored crew record, as returned by every read endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CrewMember {
    pub id: Uuid,
    pub name: String,
    pub age: i64,
    pub planet: Option<String>,
    pub email: String,
    pub rank: Option<String>,
    pub active: Option<bool>,
    /// Stored and returned, never filtered on.
    pub minor: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl CrewMember {
    pub fn from_draft(id: Uuid, draft: CrewDraft, updated_at: DateTime<Utc>) -> Self {
        CrewMember {
            id,
            name: draft.name,
            age: draft.age,
            planet: draft.planet,
            email: draft.email,
            rank: draft.rank,
            active: draft.active,
            minor: draft.minor,
            updated_at,
        }
    }

    /// Overwrites every user-supplied field, keeping `id`.
    pub fn replace_with(&mut self, draft: CrewDraft, updated_at: DateTime<Utc>) {
        *self = CrewMember::from_draft(self.id, draft, updated_at);
    }

    /// Typed value of `field`, `None` when the record leaves it unset.
    pub fn value_of(&self, field: CrewField) -> Option<FieldValue> {
        match field {
            CrewField::Id => Some(FieldValue::Id(self.id)),
            CrewField::Name => Some(FieldValue::Text(self.name.clone())),
            CrewField::Age => Some(FieldValue::Int(self.age)),
            CrewField::Planet => self.planet.clone().map(FieldValue::Text),
            CrewField::Email => Some(FieldValue::Text(self.email.clone())),
            CrewField::Rank => self.rank.clone().map(FieldValue::Text),
            CrewField::Active => self.active.map(FieldValue::Bool),
            CrewField::Minor => self.minor.map(FieldValue::Bool),
            CrewField::UpdatedAt => Some(FieldValue::Timestamp(self.updated_at)),
        }
    }
}

/// Insert/replace body. Every field is optional on the wire so that a missing
/// field surfaces as a validation message instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewCrewMember {
    pub name: Option<String>,
    #[serde(deserialize_with = "optional_whole_number")]
    pub age: Option<i64>,
    pub planet: Option<String>,
    pub email: Option<String>,
    pub rank: Option<String>,
    pub active: Option<bool>,
    pub minor: Option<bool>,
}

/// A record that passed validation and can be written as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct CrewDraft {
    pub name: String,
    pub age: i64,
    pub planet: Option<String>,
    pub email: String,
    pub rank: Option<String>,
    pub active: Option<bool>,
    pub minor: Option<bool>,
}

/// Integer value of `n`, accepting whole-valued floats such as `35.0`.
fn whole_number(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
        .map(|f| f as i64)
}

fn optional_whole_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Number>::deserialize(deserializer)? {
        None => Ok(None),
        Some(n) => whole_number(&n)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a whole number, got {n}"))),
    }
}

impl NewCrewMember {
    pub fn validate(self) -> Result<CrewDraft, StoreError> {
        let name = required_text("name", self.name)?;
        let email = required_text("email", self.email)?;
        let age = self
            .age
            .ok_or_else(|| StoreError::Validation("age is required".to_string()))?;
        check_age(age)?;

        Ok(CrewDraft {
            name,
            age,
            planet: self.planet,
            email,
            rank: self.rank,
            active: self.active,
            minor: self.minor,
        })
    }
}

/// Partial `$set`-style update. `null` and absent fields are left untouched;
/// unknown fields (including `id` and `updatedAt`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrewPatch {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub planet: Option<String>,
    pub email: Option<String>,
    pub rank: Option<String>,
    pub active: Option<bool>,
    pub minor: Option<bool>,
}

impl CrewPatch {
    /// Accepts either a bare field object or one wrapped in `{"$set": {...}}`.
    pub fn from_update_document(update: Value) -> Result<Self, StoreError> {
        let body = match update {
            Value::Object(mut map) if map.contains_key("$set") => {
                map.remove("$set").unwrap_or(Value::Null)
            }
            other => other,
        };
        serde_json::from_value(body)
            .map_err(|e| StoreError::Validation(format!("invalid update document: {e}")))
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(StoreError::Validation("name must not be empty".to_string()));
            }
        }
        if let Some(email) = &self.email {
            if email.trim().is_empty() {
                return Err(StoreError::Validation("email must not be empty".to_string()));
            }
        }
        if let Some(age) = self.age {
            check_age(age)?;
        }
        Ok(())
    }

    pub fn apply(&self, member: &mut CrewMember, updated_at: DateTime<Utc>) {
        if let Some(name) = &self.name {
            member.name = name.clone();
        }
        if let Some(age) = self.age {
            member.age = age;
        }
        if let Some(planet) = &self.planet {
            member.planet = Some(planet.clone());
        }
        if let Some(email) = &self.email {
            member.email = email.clone();
        }
        if let Some(rank) = &self.rank {
            member.rank = Some(rank.clone());
        }
        if let Some(active) = self.active {
            member.active = Some(active);
        }
        if let Some(minor) = self.minor {
            member.minor = Some(minor);
        }
        member.updated_at = updated_at;
    }
}

fn required_text(field: &str, value: Option<String>) -> Result<String, StoreError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(StoreError::Validation(format!("{field} is required"))),
    }
}

fn check_age(age: i64) -> Result<(), StoreError> {
    if age < 0 {
        return Err(StoreError::Validation(format!(
            "age must be non-negative, got {age}"
        )));
    }
    Ok(())
}

/// The queryable fields of a crew record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrewField {
    Id,
    Name,
    Age,
    Planet,
    Email,
    Rank,
    Active,
    Minor,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Text,
    Int,
    Bool,
    Timestamp,
}

impl CrewField {
    pub const ALL: [CrewField; 9] = [
        CrewField::Id,
        CrewField::Name,
        CrewField::Age,
        CrewField::Planet,
        CrewField::Email,
        CrewField::Rank,
        CrewField::Active,
        CrewField::Minor,
        CrewField::UpdatedAt,
    ];

    /// Resolves a wire name. `_id` is accepted for clients written against
    /// document-store conventions.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "_id" {
            return Some(CrewField::Id);
        }
        CrewField::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn parse(name: &str) -> Result<Self, QueryError> {
        Self::from_name(name).ok_or_else(|| QueryError::UnknownField(name.to_string()))
    }

    /// JSON name of the field.
    pub fn name(self) -> &'static str {
        match self {
            CrewField::Id => "id",
            CrewField::Name => "name",
            CrewField::Age => "age",
            CrewField::Planet => "planet",
            CrewField::Email => "email",
            CrewField::Rank => "rank",
            CrewField::Active => "active",
            CrewField::Minor => "minor",
            CrewField::UpdatedAt => "updatedAt",
        }
    }

    /// Column name in the `crew` table.
    pub fn column(self) -> &'static str {
        match self {
            CrewField::UpdatedAt => "updated_at",
            other => other.name(),
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            CrewField::Id => FieldKind::Id,
            CrewField::Name | CrewField::Planet | CrewField::Email | CrewField::Rank => {
                FieldKind::Text
            }
            CrewField::Age => FieldKind::Int,
            CrewField::Active | CrewField::Minor => FieldKind::Bool,
            CrewField::UpdatedAt => FieldKind::Timestamp,
        }
    }

    /// Casts a raw query-string value to this field's type.
    pub fn cast(self, raw: &str) -> Result<FieldValue, QueryError> {
        let invalid = |expected: &'static str| QueryError::InvalidValue {
            field: self.name(),
            value: raw.to_string(),
            expected,
        };
        match self.kind() {
            FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::Int => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| invalid("an integer")),
            FieldKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(FieldValue::Bool(true)),
                "false" | "0" => Ok(FieldValue::Bool(false)),
                _ => Err(invalid("true or false")),
            },
            FieldKind::Id => Uuid::parse_str(raw.trim())
                .map(FieldValue::Id)
                .map_err(|_| invalid("a UUID")),
            FieldKind::Timestamp => DateTime::parse_from_rfc3339(raw.trim())
                .map(|ts| FieldValue::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|_| invalid("an RFC 3339 timestamp")),
        }
    }

    /// Casts a JSON value (bulk-write filters) to this field's type.
    pub fn cast_json(self, value: &Value) -> Result<FieldValue, QueryError> {
        match (self.kind(), value) {
            (FieldKind::Int, Value::Number(n)) => {
                whole_number(n).map(FieldValue::Int).ok_or_else(|| QueryError::InvalidValue {
                    field: self.name(),
                    value: n.to_string(),
                    expected: "an integer",
                })
            }
            (FieldKind::Bool, Value::Bool(b)) => Ok(FieldValue::Bool(*b)),
            (_, Value::String(s)) => self.cast(s),
            (_, other) => Err(QueryError::InvalidValue {
                field: self.name(),
                value: other.to_string(),
                expected: "a scalar of the field's type",
            }),
        }
    }
}

impl fmt::Display for CrewField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed field value. Values of the same field always share a variant, so
/// the derived ordering is the per-field ordering (byte order for text).
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum FieldValue {
    Id(Uuid),
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Id(id) => Value::String(id.to_string()),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Timestamp(ts) => {
                serde_json::to_value(ts).unwrap_or_else(|_| Value::String(ts.to_rfc3339()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> NewCrewMember {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_validate_requires_name_age_email() {
        let err = body(json!({"age": 30, "email": "a@x.com"})).validate().unwrap_err();
        assert_eq!(err.to_string(), "name is required");

        let err = body(json!({"name": "Spock", "email": "s@x.com"})).validate().unwrap_err();
        assert_eq!(err.to_string(), "age is required");

        let err = body(json!({"name": "Spock", "age": 30, "email": "  "})).validate().unwrap_err();
        assert_eq!(err.to_string(), "email is required");
    }

    #[test]
    fn test_validate_rejects_negative_age() {
        let err = body(json!({"name": "Data", "age": -1, "email": "d@x.com"}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_patch_accepts_set_wrapper() {
        let patch = CrewPatch::from_update_document(json!({"$set": {"rank": "Admiral"}})).unwrap();
        assert_eq!(patch.rank.as_deref(), Some("Admiral"));

        let patch = CrewPatch::from_update_document(json!({"active": false})).unwrap();
        assert_eq!(patch.active, Some(false));
    }

    #[test]
    fn test_patch_ignores_id_and_nulls() {
        let patch =
            CrewPatch::from_update_document(json!({"id": "x", "planet": null, "age": 40})).unwrap();
        assert_eq!(patch, CrewPatch { age: Some(40), ..Default::default() });
    }

    #[test]
    fn test_cast_by_kind() {
        assert_eq!(CrewField::Age.cast("35").unwrap(), FieldValue::Int(35));
        assert_eq!(CrewField::Active.cast("true").unwrap(), FieldValue::Bool(true));
        assert_eq!(
            CrewField::Planet.cast("Mars").unwrap(),
            FieldValue::Text("Mars".to_string())
        );
        assert!(CrewField::Age.cast("old").is_err());
        assert!(CrewField::Id.cast("not-a-uuid").is_err());
    }

    #[test]
    fn test_age_accepts_whole_floats() {
        let member: NewCrewMember =
            serde_json::from_value(json!({"name": "Kirk", "age": 35.0, "email": "k@x"})).unwrap();
        assert_eq!(member.validate().unwrap().age, 35);

        assert!(serde_json::from_value::<NewCrewMember>(json!({"age": 35.5})).is_err());
        assert!(serde_json::from_value::<NewCrewMember>(json!({"age": "35"})).is_err());
        assert_eq!(
            CrewField::Age.cast_json(&json!(40.0)).unwrap(),
            FieldValue::Int(40)
        );
        assert!(CrewField::Age.cast_json(&json!(40.5)).is_err());
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in CrewField::ALL {
            assert_eq!(CrewField::from_name(field.name()), Some(field));
        }
        assert_eq!(CrewField::from_name("_id"), Some(CrewField::Id));
        assert_eq!(CrewField::UpdatedAt.column(), "updated_at");
        assert!(CrewField::parse("salary").is_err());
    }
}
