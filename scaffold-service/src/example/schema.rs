//! Request and response bodies for the example endpoints

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::ExampleModel;
use crate::error::{Error, Result};
use crate::repository::{Filters, Record, Value, DEFAULT_LIMIT, DEFAULT_OFFSET, LIMIT_KEY, OFFSET_KEY};
use crate::responses::ValidationError;

pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 60;
pub const AGE_MIN: i32 = 0;
pub const AGE_MAX: i32 = 116;

/// Body of `POST /example`, and of each bulk item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExampleCreate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

/// Body of `PATCH /example/{id}`; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExampleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
}

fn check_fields(
    errors: &mut ValidationError,
    prefix: &str,
    name: Option<&str>,
    age: Option<i32>,
) {
    if let Some(name) = name {
        let chars = name.chars().count();
        if chars < NAME_MIN_CHARS {
            errors.add_field_error(
                format!("{prefix}name"),
                "TOO_SHORT",
                format!("name must be at least {NAME_MIN_CHARS} characters"),
            );
        } else if chars > NAME_MAX_CHARS {
            errors.add_field_error(
                format!("{prefix}name"),
                "TOO_LONG",
                format!("name must be at most {NAME_MAX_CHARS} characters"),
            );
        }
    }

    if let Some(age) = age {
        if !(AGE_MIN..=AGE_MAX).contains(&age) {
            errors.add_field_error(
                format!("{prefix}age"),
                "OUT_OF_RANGE",
                format!("age must be between {AGE_MIN} and {AGE_MAX}"),
            );
        }
    }
}

impl ExampleCreate {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new("Validation failed");
        check_fields(&mut errors, "", self.name.as_deref(), self.age);
        errors.into_result()
    }

    /// Column values for the bulk-copy path, every field present
    pub fn to_record(&self) -> Record {
        Record::from([
            ("name".to_string(), Value::from(self.name.clone())),
            ("age".to_string(), Value::from(self.age)),
        ])
    }
}

impl From<ExampleCreate> for ExampleModel {
    fn from(data: ExampleCreate) -> Self {
        Self {
            name: data.name,
            age: data.age,
            ..Default::default()
        }
    }
}

impl ExampleUpdate {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new("Validation failed");
        check_fields(&mut errors, "", self.name.as_deref(), self.age);
        errors.into_result()
    }

    /// Assignments for the fields that were supplied
    pub fn to_assignments(&self) -> Record {
        let mut assignments = Record::new();
        if let Some(name) = &self.name {
            assignments.insert("name".to_string(), Value::from(name.as_str()));
        }
        if let Some(age) = self.age {
            assignments.insert("age".to_string(), Value::from(age));
        }
        assignments
    }
}

/// A persisted example row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: Option<String>,
    pub age: Option<i32>,
}

impl TryFrom<ExampleModel> for ExampleResponse {
    type Error = Error;

    fn try_from(model: ExampleModel) -> Result<Self> {
        match (model.id, model.created_at, model.updated_at) {
            (Some(id), Some(created_at), Some(updated_at)) => Ok(Self {
                id,
                created_at,
                updated_at,
                name: model.name,
                age: model.age,
            }),
            _ => Err(Error::Internal(
                "example row is missing storage-assigned columns".to_string(),
            )),
        }
    }
}

/// Query string of `GET /example`
///
/// `offset` and `limit` paginate; every other key is a `field[__op]`
/// filter whose text value is coerced to the column's type later.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleQueryParams {
    pub offset: u64,
    pub limit: u64,
    pub filters: BTreeMap<String, String>,
}

impl Default for ExampleQueryParams {
    fn default() -> Self {
        Self {
            offset: DEFAULT_OFFSET,
            limit: DEFAULT_LIMIT,
            filters: BTreeMap::new(),
        }
    }
}

impl ExampleQueryParams {
    /// Split raw query pairs into pagination and filters
    pub fn from_query(mut raw: BTreeMap<String, String>) -> std::result::Result<Self, ValidationError> {
        let mut errors = ValidationError::new("Validation failed");
        let offset = take_non_negative(&mut raw, OFFSET_KEY, DEFAULT_OFFSET, &mut errors);
        let limit = take_non_negative(&mut raw, LIMIT_KEY, DEFAULT_LIMIT, &mut errors);
        errors.into_result()?;

        Ok(Self {
            offset,
            limit,
            filters: raw,
        })
    }

    /// Filter map handed to the repository, pagination included
    pub fn to_filters(&self) -> Filters {
        let mut filters: Filters = self
            .filters
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        filters.insert(OFFSET_KEY.to_string(), Value::Int(self.offset as i64));
        filters.insert(LIMIT_KEY.to_string(), Value::Int(self.limit as i64));
        filters
    }
}

fn take_non_negative(
    raw: &mut BTreeMap<String, String>,
    key: &'static str,
    default: u64,
    errors: &mut ValidationError,
) -> u64 {
    match raw.remove(key) {
        None => default,
        Some(text) if text.trim().is_empty() => default,
        Some(text) => match text.trim().parse::<u64>() {
            Ok(value) if value <= i64::MAX as u64 => value,
            _ => {
                errors.add_field_error(
                    key,
                    "INVALID_NUMBER",
                    format!("{key} must be a non-negative integer"),
                );
                default
            }
        },
    }
}

/// One page of results with links to its neighbours
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionResponse<T> {
    /// Number of items on this page
    pub count: usize,
    pub next: String,
    pub previous: String,
    pub results: Vec<T>,
}

impl<T> CollectionResponse<T> {
    /// Build a page for `results` fetched at `offset`/`limit` from `uri`
    pub fn parse_collection(uri: &http::Uri, results: Vec<T>, offset: u64, limit: u64) -> Self {
        let previous = offset.saturating_sub(limit);
        let next = offset.saturating_add(limit);

        Self {
            count: results.len(),
            next: with_offset(uri, next),
            previous: with_offset(uri, previous),
            results,
        }
    }
}

/// `uri` with its `offset` query parameter set to `offset`
fn with_offset(uri: &http::Uri, offset: u64) -> String {
    let replacement = format!("{OFFSET_KEY}={offset}");
    let mut replaced = false;

    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            if key != OFFSET_KEY {
                Some(pair.to_string())
            } else if !replaced {
                replaced = true;
                Some(replacement.clone())
            } else {
                None
            }
        })
        .collect();

    if !replaced {
        pairs.push(replacement);
    }

    let origin = match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
        _ => String::new(),
    };
    format!("{origin}{}?{}", uri.path(), pairs.join("&"))
}

/// Body of `POST /example/bulk_insert`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkInsertCreate<T> {
    pub items: Vec<T>,
}

impl BulkInsertCreate<ExampleCreate> {
    /// Every item must validate; the list must not be empty
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new("Validation failed");

        if self.items.is_empty() {
            errors.add_field_error("items", "REQUIRED", "items must not be empty");
        }

        for (index, item) in self.items.iter().enumerate() {
            check_fields(
                &mut errors,
                &format!("items[{index}]."),
                item.name.as_deref(),
                item.age,
            );
        }

        errors.into_result()
    }
}

/// Outcome of a bulk insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkInsertResponse {
    /// Seconds spent loading
    pub elapsed_time: f64,
    pub inserted_rows: u64,
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_bounds() {
        let ok = ExampleCreate {
            name: Some("Ann".into()),
            age: Some(116),
        };
        assert!(ok.validate().is_ok());

        let bad = ExampleCreate {
            name: Some("Al".into()),
            age: Some(117),
        };
        let errors = bad.validate().unwrap_err();
        assert_eq!(errors.errors["name"][0].code, "TOO_SHORT");
        assert_eq!(errors.errors["age"][0].code, "OUT_OF_RANGE");

        let long = ExampleCreate {
            name: Some("x".repeat(61)),
            age: Some(-1),
        };
        let errors = long.validate().unwrap_err();
        assert_eq!(errors.errors["name"][0].code, "TOO_LONG");
        assert_eq!(errors.error_count(), 2);
    }

    #[test]
    fn test_empty_create_is_valid() {
        assert!(ExampleCreate::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let parsed: std::result::Result<ExampleCreate, _> =
            serde_json::from_str(r#"{"name": "ann", "nickname": "a"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_update_assigns_only_supplied_fields() {
        let update = ExampleUpdate {
            name: None,
            age: Some(33),
        };
        let assignments = update.to_assignments();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments["age"], Value::Int(33));
    }

    #[test]
    fn test_query_params_split_pagination() {
        let raw = BTreeMap::from([
            ("offset".to_string(), "20".to_string()),
            ("age__gte".to_string(), "18".to_string()),
        ]);
        let params = ExampleQueryParams::from_query(raw).unwrap();
        assert_eq!(params.offset, 20);
        assert_eq!(params.limit, 10);

        let filters = params.to_filters();
        assert_eq!(filters["age__gte"], Value::from("18"));
        assert_eq!(filters["offset"], Value::Int(20));
        assert_eq!(filters["limit"], Value::Int(10));
    }

    #[test]
    fn test_query_params_reject_negative_limit() {
        let raw = BTreeMap::from([("limit".to_string(), "-1".to_string())]);
        let errors = ExampleQueryParams::from_query(raw).unwrap_err();
        assert_eq!(errors.errors["limit"][0].code, "INVALID_NUMBER");
    }

    #[test]
    fn test_collection_links() {
        let uri: http::Uri = "/example?age__gte=18&offset=20&limit=10".parse().unwrap();
        let page = CollectionResponse::parse_collection(&uri, vec![1, 2, 3], 20, 10);

        assert_eq!(page.count, 3);
        assert_eq!(page.next, "/example?age__gte=18&offset=30&limit=10");
        assert_eq!(page.previous, "/example?age__gte=18&offset=10&limit=10");
    }

    #[test]
    fn test_collection_links_keep_origin() {
        let uri: http::Uri = "http://api.local:8080/example?limit=5".parse().unwrap();
        let page = CollectionResponse::<i32>::parse_collection(&uri, vec![], 0, 5);

        assert_eq!(page.next, "http://api.local:8080/example?limit=5&offset=5");
        assert_eq!(page.previous, "http://api.local:8080/example?limit=5&offset=0");
    }

    #[test]
    fn test_collection_previous_clamps_at_zero() {
        let uri: http::Uri = "/example".parse().unwrap();
        let page = CollectionResponse::<i32>::parse_collection(&uri, vec![], 5, 10);

        assert_eq!(page.next, "/example?offset=15");
        assert_eq!(page.previous, "/example?offset=0");
    }

    #[test]
    fn test_bulk_validation_reports_item_index() {
        let body = BulkInsertCreate {
            items: vec![
                ExampleCreate {
                    name: Some("felipe".into()),
                    age: Some(19),
                },
                ExampleCreate {
                    name: Some("gustavo".into()),
                    age: Some(200),
                },
            ],
        };
        let errors = body.validate().unwrap_err();
        assert!(errors.errors.contains_key("items[1].age"));

        let empty = BulkInsertCreate::<ExampleCreate> { items: vec![] };
        assert!(empty.validate().unwrap_err().errors.contains_key("items"));
    }

    #[test]
    fn test_response_requires_persisted_model() {
        assert!(ExampleResponse::try_from(ExampleModel::default()).is_err());
    }
}
