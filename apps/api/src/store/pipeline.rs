//! Typed aggregation pipelines.
//!
//! A pipeline is validated once on construction; evaluation is then
//! infallible. Stages before a `Group` operate on crew records, stages after
//! it operate on the group rows `{<field>: key, <count_as>: n}`.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::models::{CrewField, CrewMember, FieldValue};
use crate::store::query::{compare_values, Filter, QueryError, Sort, SortDirection};

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    /// Groups by `by`, counting members into the output field `count_as`.
    Group { by: CrewField, count_as: String },
    /// Keys name record fields before a group, group output fields after it.
    Sort(Vec<(String, SortDirection)>),
    Limit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self, QueryError> {
        let mut grouped: Option<(CrewField, &str)> = None;
        for stage in &stages {
            match stage {
                Stage::Match(_) if grouped.is_some() => {
                    return Err(QueryError::UnsupportedPipeline(
                        "match stages must precede the group stage".to_string(),
                    ));
                }
                Stage::Match(_) | Stage::Limit(_) => {}
                Stage::Group { .. } if grouped.is_some() => {
                    return Err(QueryError::UnsupportedPipeline(
                        "only one group stage is supported".to_string(),
                    ));
                }
                Stage::Group { by, count_as } => {
                    if count_as.is_empty() || count_as == by.name() {
                        return Err(QueryError::UnsupportedPipeline(format!(
                            "invalid count field '{count_as}'"
                        )));
                    }
                    grouped = Some((*by, count_as));
                }
                Stage::Sort(keys) => {
                    for (name, _) in keys {
                        match grouped {
                            Some((by, count_as)) if name == by.name() || name == count_as => {}
                            Some(_) => {
                                return Err(QueryError::UnsupportedPipeline(format!(
                                    "cannot sort groups by '{name}'"
                                )));
                            }
                            None => {
                                CrewField::parse(name)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(Pipeline { stages })
    }

    /// The conjunction of the leading match stages, which a backend may
    /// evaluate natively before handing the records to [`Pipeline::evaluate`].
    pub fn pushdown_filter(&self) -> Filter {
        self.stages
            .iter()
            .map_while(|stage| match stage {
                Stage::Match(filter) => Some(filter.clone()),
                _ => None,
            })
            .fold(Filter::all(), Filter::and)
    }

    /// Runs every stage over `records`, which must be in natural order.
    pub fn evaluate(&self, records: Vec<CrewMember>) -> Vec<Value> {
        let mut rows = Rows::Records(records);
        for stage in &self.stages {
            rows = match (stage, rows) {
                (Stage::Match(filter), Rows::Records(mut records)) => {
                    records.retain(|m| filter.matches(m));
                    Rows::Records(records)
                }
                (Stage::Group { by, count_as }, Rows::Records(records)) => Rows::Groups {
                    by: *by,
                    count_as: count_as.clone(),
                    groups: group_by(&records, *by),
                },
                (Stage::Sort(keys), Rows::Records(mut records)) => {
                    let sort = keys.iter().fold(Sort::default(), |sort, (name, dir)| {
                        match CrewField::from_name(name) {
                            Some(field) => sort.then(field, *dir),
                            None => sort,
                        }
                    });
                    records.sort_by(|a, b| sort.compare(a, b));
                    Rows::Records(records)
                }
                (Stage::Sort(keys), Rows::Groups { by, count_as, mut groups }) => {
                    groups.sort_by(|a, b| {
                        keys.iter()
                            .map(|(name, dir)| {
                                let ord = if name == &count_as {
                                    a.count.cmp(&b.count)
                                } else {
                                    compare_values(&a.key, &b.key)
                                };
                                dir.apply(ord)
                            })
                            .find(|ord| *ord != Ordering::Equal)
                            .unwrap_or(Ordering::Equal)
                    });
                    Rows::Groups { by, count_as, groups }
                }
                (Stage::Limit(n), Rows::Records(mut records)) => {
                    records.truncate(*n);
                    Rows::Records(records)
                }
                (Stage::Limit(n), Rows::Groups { by, count_as, mut groups }) => {
                    groups.truncate(*n);
                    Rows::Groups { by, count_as, groups }
                }
                // Rejected by `Pipeline::new`.
                (_, rows) => rows,
            };
        }
        rows.into_json()
    }
}

#[derive(Debug)]
struct Group {
    key: Option<FieldValue>,
    count: u64,
}

enum Rows {
    Records(Vec<CrewMember>),
    Groups {
        by: CrewField,
        count_as: String,
        groups: Vec<Group>,
    },
}

impl Rows {
    fn into_json(self) -> Vec<Value> {
        match self {
            Rows::Records(records) => records
                .iter()
                .filter_map(|m| serde_json::to_value(m).ok())
                .collect(),
            Rows::Groups {
                by,
                count_as,
                groups,
            } => groups
                .into_iter()
                .map(|g| {
                    let mut row = Map::new();
                    row.insert(
                        by.name().to_string(),
                        g.key.map_or(Value::Null, |k| k.to_json()),
                    );
                    row.insert(count_as.clone(), Value::from(g.count));
                    Value::Object(row)
                })
                .collect(),
        }
    }
}

/// Groups in first-appearance order. Unset values form their own group.
fn group_by(records: &[CrewMember], field: CrewField) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for member in records {
        let key = member.value_of(field);
        match groups.iter_mut().find(|g| g.key == key) {
            Some(group) => group.count += 1,
            None => groups.push(Group { key, count: 1 }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn member(name: &str, age: i64, planet: &str) -> CrewMember {
        CrewMember {
            id: Uuid::new_v4(),
            name: name.to_string(),
            age,
            planet: Some(planet.to_string()),
            email: format!("{name}@fleet.test"),
            rank: None,
            active: None,
            minor: None,
            updated_at: Utc::now(),
        }
    }

    fn group_count() -> Stage {
        Stage::Group {
            by: CrewField::Planet,
            count_as: "count".to_string(),
        }
    }

    #[test]
    fn test_group_counts_in_first_appearance_order() {
        let pipeline = Pipeline::new(vec![group_count()]).unwrap();
        let rows = pipeline.evaluate(vec![
            member("a", 20, "A"),
            member("b", 20, "B"),
            member("c", 20, "A"),
        ]);
        assert_eq!(
            rows,
            vec![json!({"planet": "A", "count": 2}), json!({"planet": "B", "count": 1})]
        );
    }

    #[test]
    fn test_sort_desc_and_limit_groups() {
        let pipeline = Pipeline::new(vec![
            group_count(),
            Stage::Sort(vec![("count".to_string(), SortDirection::Desc)]),
            Stage::Limit(1),
        ])
        .unwrap();
        let rows = pipeline.evaluate(vec![
            member("a", 20, "Earth"),
            member("b", 20, "Mars"),
            member("c", 20, "Mars"),
        ]);
        assert_eq!(rows, vec![json!({"planet": "Mars", "count": 2})]);
    }

    #[test]
    fn test_match_before_group() {
        let pipeline = Pipeline::new(vec![
            Stage::Match(Filter::all().gte(CrewField::Age, FieldValue::Int(18))),
            Stage::Group {
                by: CrewField::Planet,
                count_as: "total".to_string(),
            },
        ])
        .unwrap();
        let rows = pipeline.evaluate(vec![member("a", 12, "Earth"), member("b", 40, "Vulcan")]);
        assert_eq!(rows, vec![json!({"planet": "Vulcan", "total": 1})]);
    }

    #[test]
    fn test_pushdown_collects_leading_matches_only() {
        let adults = Filter::all().gte(CrewField::Age, FieldValue::Int(18));
        let pipeline = Pipeline::new(vec![Stage::Match(adults.clone()), group_count()]).unwrap();
        assert_eq!(pipeline.pushdown_filter(), adults);

        let pipeline = Pipeline::new(vec![group_count()]).unwrap();
        assert!(pipeline.pushdown_filter().is_empty());
    }

    #[test]
    fn test_rejects_invalid_shapes() {
        assert!(Pipeline::new(vec![group_count(), Stage::Match(Filter::all())]).is_err());
        assert!(Pipeline::new(vec![group_count(), group_count()]).is_err());
        assert!(Pipeline::new(vec![
            group_count(),
            Stage::Sort(vec![("age".to_string(), SortDirection::Asc)]),
        ])
        .is_err());
        assert!(Pipeline::new(vec![Stage::Sort(vec![("salary".to_string(), SortDirection::Asc)])]).is_err());
    }
}
