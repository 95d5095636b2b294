//! Filter compiler
//!
//! Translates a flat filter map into typed predicates. Keys take the form
//! `field` or `field__operator`; the key is split on the first `__` and a bare
//! field means equality.
//!
//! | token | meaning                 |
//! |-------|-------------------------|
//! | `eq`  | equal (default)         |
//! | `ne`  | not equal               |
//! | `lt`  | less than               |
//! | `lte` | less than or equal      |
//! | `gt`  | greater than            |
//! | `gte` | greater than or equal   |
//! | `in`  | member of a sequence    |
//!
//! # Example
//!
//! ```rust
//! use scaffold_service::example::ExampleModel;
//! use scaffold_service::repository::{compile, FilterOperator, Value};
//!
//! let predicate = compile::<ExampleModel>("age__gte", Value::from("18")).unwrap();
//! assert_eq!(predicate.column.name, "age");
//! assert_eq!(predicate.operator, FilterOperator::GreaterThanOrEqual);
//! assert_eq!(predicate.value, Value::Int(18));
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::entity::{Column, Entity};
use super::error::FilterError;
use super::value::{Record, Value};

/// Separator between field name and operator token
pub const SEPARATOR: &str = "__";

/// Caller-supplied filter map
pub type Filters = BTreeMap<String, Value>;

/// Comparison operator of a compiled predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (<>)
    NotEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Member of a sequence (IN)
    In,
}

impl FilterOperator {
    /// Token used in filter keys
    pub const fn token(&self) -> &'static str {
        match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::LessThan => "lt",
            Self::LessThanOrEqual => "lte",
            Self::GreaterThan => "gt",
            Self::GreaterThanOrEqual => "gte",
            Self::In => "in",
        }
    }

    /// Whether the operator orders its operands
    pub const fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::LessThanOrEqual | Self::GreaterThan | Self::GreaterThanOrEqual
        )
    }
}

impl FromStr for FilterOperator {
    type Err = FilterError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "eq" => Ok(Self::Equal),
            "ne" => Ok(Self::NotEqual),
            "lt" => Ok(Self::LessThan),
            "lte" => Ok(Self::LessThanOrEqual),
            "gt" => Ok(Self::GreaterThan),
            "gte" => Ok(Self::GreaterThanOrEqual),
            "in" => Ok(Self::In),
            other => Err(FilterError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "<>"),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::In => write!(f, "IN"),
        }
    }
}

/// One compiled comparison over one column
///
/// The value is already coerced to the column's kind. For
/// [`FilterOperator::In`] it is always a [`Value::List`].
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static Column,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Predicate {
    /// Evaluate against a row with SQL semantics
    ///
    /// A `NULL` column value satisfies only `eq null`; every other comparison
    /// with `NULL` is unknown and therefore false.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(self.column.name).unwrap_or(&Value::Null);

        match (self.operator, &self.value) {
            (FilterOperator::Equal, Value::Null) => actual.is_null(),
            (FilterOperator::NotEqual, Value::Null) => !actual.is_null(),
            (FilterOperator::In, Value::List(items)) => items
                .iter()
                .any(|item| actual.compare(item) == Some(Ordering::Equal)),
            (operator, expected) => match actual.compare(expected) {
                None => false,
                Some(ordering) => match operator {
                    FilterOperator::Equal => ordering == Ordering::Equal,
                    FilterOperator::NotEqual => ordering != Ordering::Equal,
                    FilterOperator::LessThan => ordering == Ordering::Less,
                    FilterOperator::LessThanOrEqual => ordering != Ordering::Greater,
                    FilterOperator::GreaterThan => ordering == Ordering::Greater,
                    FilterOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                    FilterOperator::In => false,
                },
            },
        }
    }
}

/// Split a filter key into field name and operator token
///
/// Splits on the first separator only; a key without one means `eq`.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(SEPARATOR).unwrap_or((key, "eq"))
}

/// Compile one filter entry for entity `E`
///
/// The operator is checked before the column, so an unrecognized suffix is
/// always reported as [`FilterError::UnsupportedOperator`].
pub fn compile<E: Entity>(key: &str, value: Value) -> Result<Predicate, FilterError> {
    let (field, token) = split_key(key);
    let operator: FilterOperator = token.parse()?;

    let column = E::column(field).ok_or_else(|| FilterError::UnknownColumn {
        entity: E::NAME,
        column: field.to_string(),
    })?;

    let value = match operator {
        FilterOperator::In => Value::List(coerce_sequence(column, value)?),
        _ if value.is_null() && operator.is_ordering() => {
            return Err(invalid_value(column, &value));
        }
        _ => coerce(column, &value)?,
    };

    Ok(Predicate {
        column,
        operator,
        value,
    })
}

/// Compile a whole filter map into a conjunction
pub fn compile_all<E: Entity>(filters: Filters) -> Result<Vec<Predicate>, FilterError> {
    filters
        .into_iter()
        .map(|(key, value)| compile::<E>(&key, value))
        .collect()
}

fn coerce(column: &Column, value: &Value) -> Result<Value, FilterError> {
    column
        .kind
        .coerce(value)
        .ok_or_else(|| invalid_value(column, value))
}

fn coerce_sequence(column: &Column, value: Value) -> Result<Vec<Value>, FilterError> {
    let items = match value {
        Value::List(items) => items,
        Value::Text(text) if text.trim().is_empty() => Vec::new(),
        Value::Text(text) => text.split(',').map(|part| Value::Text(part.to_string())).collect(),
        _ => {
            return Err(FilterError::ExpectedSequence {
                column: column.name.to_string(),
            })
        }
    };

    items
        .iter()
        .map(|item| match item {
            Value::Null | Value::List(_) => Err(invalid_value(column, item)),
            _ => coerce(column, item),
        })
        .collect()
}

fn invalid_value(column: &Column, value: &Value) -> FilterError {
    FilterError::InvalidValue {
        column: column.name.to_string(),
        expected: column.kind,
        found: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::ExampleModel;

    #[test]
    fn test_bare_field_means_equal() {
        let predicate = compile::<ExampleModel>("name", Value::from("bob")).unwrap();
        assert_eq!(predicate.column.name, "name");
        assert_eq!(predicate.operator, FilterOperator::Equal);
        assert_eq!(predicate.value, Value::Text("bob".into()));
    }

    #[test]
    fn test_every_operator_token() {
        let cases = [
            ("age__eq", FilterOperator::Equal),
            ("age__ne", FilterOperator::NotEqual),
            ("age__lt", FilterOperator::LessThan),
            ("age__lte", FilterOperator::LessThanOrEqual),
            ("age__gt", FilterOperator::GreaterThan),
            ("age__gte", FilterOperator::GreaterThanOrEqual),
        ];

        for (key, expected) in cases {
            let predicate = compile::<ExampleModel>(key, Value::Int(30)).unwrap();
            assert_eq!(predicate.operator, expected, "key {key}");
            assert_eq!(predicate.operator.token(), split_key(key).1);
        }
    }

    #[test]
    fn test_unknown_operator_names_suffix() {
        let err = compile::<ExampleModel>("age__between", Value::Int(1)).unwrap_err();
        assert_eq!(err, FilterError::UnsupportedOperator("between".into()));
        assert_eq!(err.to_string(), "Unsupported operator: between");
    }

    #[test]
    fn test_unknown_operator_wins_over_unknown_column() {
        let err = compile::<ExampleModel>("nickname__like", Value::from("x")).unwrap_err();
        assert_eq!(err, FilterError::UnsupportedOperator("like".into()));
    }

    #[test]
    fn test_split_on_first_separator_only() {
        assert_eq!(split_key("age__in"), ("age", "in"));
        assert_eq!(split_key("age__gt__x"), ("age", "gt__x"));
        assert_eq!(split_key("age"), ("age", "eq"));

        let err = compile::<ExampleModel>("age__gt__x", Value::Int(1)).unwrap_err();
        assert_eq!(err, FilterError::UnsupportedOperator("gt__x".into()));
    }

    #[test]
    fn test_unknown_column() {
        let err = compile::<ExampleModel>("nickname", Value::from("x")).unwrap_err();
        assert_eq!(
            err,
            FilterError::UnknownColumn {
                entity: "Example",
                column: "nickname".into()
            }
        );
    }

    #[test]
    fn test_in_requires_sequence() {
        let err = compile::<ExampleModel>("age__in", Value::Int(3)).unwrap_err();
        assert_eq!(err, FilterError::ExpectedSequence { column: "age".into() });
    }

    #[test]
    fn test_in_accepts_list_and_comma_text() {
        let from_list = compile::<ExampleModel>("age__in", Value::from(vec![1, 2, 3])).unwrap();
        let from_text = compile::<ExampleModel>("age__in", Value::from("1, 2,3")).unwrap();

        let expected = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(from_list.value, expected);
        assert_eq!(from_text.value, expected);
    }

    #[test]
    fn test_in_empty_sequence() {
        let predicate = compile::<ExampleModel>("age__in", Value::List(vec![])).unwrap();
        assert_eq!(predicate.value, Value::List(vec![]));

        let mut record = Record::new();
        record.insert("age".into(), Value::Int(3));
        assert!(!predicate.matches(&record));
    }

    #[test]
    fn test_invalid_value() {
        let err = compile::<ExampleModel>("age__gt", Value::from("old")).unwrap_err();
        assert!(matches!(err, FilterError::InvalidValue { ref column, .. } if column == "age"));
    }

    #[test]
    fn test_null_comparisons() {
        assert!(compile::<ExampleModel>("name", Value::Null).is_ok());
        assert!(compile::<ExampleModel>("name__ne", Value::Null).is_ok());

        let err = compile::<ExampleModel>("age__lt", Value::Null).unwrap_err();
        assert!(matches!(err, FilterError::InvalidValue { .. }));
    }

    #[test]
    fn test_matches_sql_null_semantics() {
        let mut unnamed = Record::new();
        unnamed.insert("name".into(), Value::Null);

        let is_null = compile::<ExampleModel>("name", Value::Null).unwrap();
        let not_bob = compile::<ExampleModel>("name__ne", Value::from("bob")).unwrap();

        assert!(is_null.matches(&unnamed));
        assert!(!not_bob.matches(&unnamed));
    }

    #[test]
    fn test_compile_all_is_order_independent() {
        let mut forward = Filters::new();
        forward.insert("age__gte".into(), Value::Int(18));
        forward.insert("name".into(), Value::from("bob"));

        let mut backward = Filters::new();
        backward.insert("name".into(), Value::from("bob"));
        backward.insert("age__gte".into(), Value::Int(18));

        assert_eq!(
            compile_all::<ExampleModel>(forward).unwrap(),
            compile_all::<ExampleModel>(backward).unwrap()
        );
    }
}
