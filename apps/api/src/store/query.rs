//! Filters, sort orders, pagination and projection shared by every backend.
//!
//! Request parameters are parsed into these types once at the HTTP boundary;
//! the in-memory store evaluates them directly and the Postgres store renders
//! them into SQL.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{CrewField, CrewMember, FieldValue};

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid sort specification: {0}")]
    InvalidSort(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unsupported pipeline: {0}")]
    UnsupportedPipeline(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(CrewField, FieldValue),
    Gte(CrewField, FieldValue),
    /// Case-insensitive substring match against any of `fields`.
    /// `needle` is stored lowercased.
    ContainsAny {
        fields: Vec<CrewField>,
        needle: String,
    },
}

impl Condition {
    fn matches(&self, member: &CrewMember) -> bool {
        match self {
            Condition::Eq(field, expected) => member.value_of(*field).as_ref() == Some(expected),
            Condition::Gte(field, bound) => member
                .value_of(*field)
                .and_then(|v| v.partial_cmp(bound))
                .is_some_and(|ord| ord != Ordering::Less),
            Condition::ContainsAny { fields, needle } => fields.iter().any(|field| {
                matches!(
                    member.value_of(*field),
                    Some(FieldValue::Text(text)) if text.to_lowercase().contains(needle.as_str())
                )
            }),
        }
    }
}

/// A conjunction of conditions. The empty filter matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: CrewField, value: FieldValue) -> Self {
        self.conditions.push(Condition::Eq(field, value));
        self
    }

    pub fn gte(mut self, field: CrewField, value: FieldValue) -> Self {
        self.conditions.push(Condition::Gte(field, value));
        self
    }

    pub fn contains_any(mut self, fields: &[CrewField], needle: &str) -> Self {
        self.conditions.push(Condition::ContainsAny {
            fields: fields.to_vec(),
            needle: needle.to_lowercase(),
        });
        self
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Builds an exact-match filter from query-string parameters, casting each
    /// value to its field's type. Parameters are applied in name order.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, QueryError> {
        let mut names: Vec<&String> = params.keys().collect();
        names.sort();

        let mut filter = Filter::all();
        for name in names {
            let field = CrewField::parse(name)?;
            filter = filter.eq(field, field.cast(&params[name])?);
        }
        Ok(filter)
    }

    /// Builds an exact-match filter from a JSON object (bulk-write items).
    pub fn from_json(object: &Map<String, Value>) -> Result<Self, QueryError> {
        let mut filter = Filter::all();
        for (name, value) in object {
            let field = CrewField::parse(name)?;
            filter = filter.eq(field, field.cast_json(value)?);
        }
        Ok(filter)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, member: &CrewMember) -> bool {
        self.conditions.iter().all(|c| c.matches(member))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Accepts `1`/`-1` and the usual spelled-out forms.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(SortDirection::Asc),
                Some(-1) => Some(SortDirection::Desc),
                _ => None,
            },
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "asc" | "ascending" | "1" => Some(SortDirection::Asc),
                "desc" | "descending" | "-1" => Some(SortDirection::Desc),
                _ => None,
            },
            _ => None,
        }
    }

    /// Applies the direction to an ascending comparison.
    pub fn apply(self, ord: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: CrewField,
    pub direction: SortDirection,
}

/// Ordered sort keys. Unset values sort before set ones when ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    keys: Vec<SortKey>,
}

impl Sort {
    pub fn by(field: CrewField, direction: SortDirection) -> Self {
        Sort::default().then(field, direction)
    }

    pub fn then(mut self, field: CrewField, direction: SortDirection) -> Self {
        self.keys.push(SortKey { field, direction });
        self
    }

    /// Parses a JSON sort document such as `{"rank": -1, "name": 1}`.
    /// Key order in the document is the precedence order.
    pub fn parse_json(raw: &str) -> Result<Self, QueryError> {
        let doc: Value =
            serde_json::from_str(raw).map_err(|e| QueryError::InvalidSort(e.to_string()))?;
        let Value::Object(object) = doc else {
            return Err(QueryError::InvalidSort(
                "expected a JSON object of field directions".to_string(),
            ));
        };

        let mut sort = Sort::default();
        for (name, direction) in &object {
            let field = CrewField::parse(name)?;
            let direction = SortDirection::from_json(direction).ok_or_else(|| {
                QueryError::InvalidSort(format!("invalid direction {direction} for '{name}'"))
            })?;
            sort = sort.then(field, direction);
        }
        Ok(sort)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn compare(&self, a: &CrewMember, b: &CrewMember) -> Ordering {
        for key in &self.keys {
            let ord = compare_values(&a.value_of(key.field), &b.value_of(key.field));
            let ord = key.direction.apply(ord);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

pub(crate) fn compare_values(a: &Option<FieldValue>, b: &Option<FieldValue>) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Field subset to return. `id` is always included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<CrewField>,
}

impl Projection {
    /// Parses a comma-separated field list such as `name,rank,planet`.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let fields = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(CrewField::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if fields.is_empty() {
            return Err(QueryError::InvalidParameter {
                name: "fields",
                reason: "expected at least one field name".to_string(),
            });
        }
        Ok(Projection { fields })
    }

    pub fn apply(&self, member: &CrewMember) -> Value {
        let mut object = Map::new();
        object.insert(CrewField::Id.name().to_string(), Value::String(member.id.to_string()));
        for field in &self.fields {
            let value = member.value_of(*field).map_or(Value::Null, |v| v.to_json());
            object.insert(field.name().to_string(), value);
        }
        Value::Object(object)
    }
}

/// Sort, pagination and projection for a find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub skip: u64,
    /// `None` means unbounded.
    pub limit: Option<u64>,
    /// Applied at the response boundary; stores always return whole records.
    pub projection: Option<Projection>,
}

impl FindOptions {
    pub fn sorted(sort: Sort) -> Self {
        FindOptions {
            sort: Some(sort),
            ..Default::default()
        }
    }

    /// A limit of zero means "no limit".
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sorts, skips and truncates an already-filtered record set in place.
    pub fn paginate(&self, records: &mut Vec<CrewMember>) {
        if let Some(sort) = &self.sort {
            records.sort_by(|a, b| sort.compare(a, b));
        }
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        records.drain(..skip.min(records.len()));
        if let Some(limit) = self.limit {
            records.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
    }

    pub fn project(&self, records: &[CrewMember]) -> Result<Vec<Value>, serde_json::Error> {
        match &self.projection {
            Some(projection) => Ok(records.iter().map(|m| projection.apply(m)).collect()),
            None => records.iter().map(serde_json::to_value).collect(),
        }
    }
}

/// Parses a non-negative count parameter such as `?n=5`.
pub fn parse_count(name: &'static str, raw: Option<&String>) -> Result<u64, QueryError> {
    let raw = raw.ok_or_else(|| QueryError::InvalidParameter {
        name,
        reason: "parameter is required".to_string(),
    })?;
    raw.trim()
        .parse::<u64>()
        .map_err(|_| QueryError::InvalidParameter {
            name,
            reason: format!("expected a non-negative integer, got '{raw}'"),
        })
}
