//! Query builder
//!
//! Composes backend-neutral read queries and update statements from a filter
//! map. Rendering to SQL lives with the PostgreSQL store; the in-memory store
//! evaluates the same structures directly.

use uuid::Uuid;

use super::entity::{Column, Entity};
use super::error::FilterError;
use super::filter::{compile, compile_all, Filters, Predicate};
use super::value::{Record, Value};

/// Reserved filter key for the number of rows to skip
pub const OFFSET_KEY: &str = "offset";

/// Reserved filter key for the maximum number of rows
pub const LIMIT_KEY: &str = "limit";

/// Rows skipped when the caller gives no offset
pub const DEFAULT_OFFSET: u64 = 0;

/// Rows returned when the caller gives no limit
pub const DEFAULT_LIMIT: u64 = 10;

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of results to skip
    pub offset: u64,
    /// Maximum number of results to return
    pub limit: u64,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Only the first row
    #[must_use]
    pub const fn single() -> Self {
        Self { offset: 0, limit: 1 }
    }

    /// Remove `offset` and `limit` from a filter map
    ///
    /// Missing keys fall back to [`DEFAULT_OFFSET`] and [`DEFAULT_LIMIT`].
    /// Values may be integers or numeric text.
    pub fn extract(filters: &mut Filters) -> Result<Self, FilterError> {
        let offset = take_count(filters, OFFSET_KEY)?.unwrap_or(DEFAULT_OFFSET);
        let limit = take_count(filters, LIMIT_KEY)?.unwrap_or(DEFAULT_LIMIT);
        Ok(Self { offset, limit })
    }

    /// Apply to an iterator of rows
    pub fn window<T>(&self, rows: impl IntoIterator<Item = T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.limit).unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET, DEFAULT_LIMIT)
    }
}

fn take_count(filters: &mut Filters, key: &'static str) -> Result<Option<u64>, FilterError> {
    let Some(value) = filters.remove(key) else {
        return Ok(None);
    };

    let count = match &value {
        Value::Null => return Ok(None),
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::Text(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };

    count.map(Some).ok_or_else(|| FilterError::InvalidPagination {
        key,
        value: value.to_string(),
    })
}

/// A read over one entity's table
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: &'static str,
    pub columns: &'static [Column],
    pub predicates: Vec<Predicate>,
    pub pagination: Option<Pagination>,
}

impl SelectQuery {
    /// Attach offset and limit
    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Whether the query selects the whole collection
    pub fn is_unconditioned(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether a row satisfies every predicate
    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

/// An update of every row matching a predicate conjunction
///
/// Storage also sets [`UpdateStatement::touch`] to the current time and
/// returns the updated rows.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: &'static str,
    pub columns: &'static [Column],
    pub predicates: Vec<Predicate>,
    pub assignments: Vec<(&'static Column, Value)>,
    pub touch: &'static str,
}

impl UpdateStatement {
    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

/// Build a read query from a filter map
///
/// An empty map selects every row. Pagination is attached by the caller.
pub fn build_select<E: Entity>(filters: Filters) -> Result<SelectQuery, FilterError> {
    Ok(SelectQuery {
        table: E::TABLE,
        columns: E::COLUMNS,
        predicates: compile_all::<E>(filters)?,
        pagination: None,
    })
}

/// Build a read query for one identity
pub fn select_by_id<E: Entity>(id: Uuid) -> Result<SelectQuery, FilterError> {
    let predicate = compile::<E>(E::identity_column(), Value::Uuid(id))?;
    Ok(SelectQuery {
        table: E::TABLE,
        columns: E::COLUMNS,
        predicates: vec![predicate],
        pagination: Some(Pagination::single()),
    })
}

/// Build an update statement from a filter map and assignments
///
/// Assignments must be non-empty and may only target data columns. Values
/// are coerced to the column kind; `NULL` clears a column.
pub fn build_update<E: Entity>(
    filters: Filters,
    assignments: Record,
) -> Result<UpdateStatement, FilterError> {
    if assignments.is_empty() {
        return Err(FilterError::EmptyAssignments);
    }

    let predicates = compile_all::<E>(filters)?;

    let assignments = assignments
        .into_iter()
        .map(|(name, value)| {
            let column = E::column(&name).ok_or_else(|| FilterError::UnknownColumn {
                entity: E::NAME,
                column: name.clone(),
            })?;

            if !column.is_writable() {
                return Err(FilterError::ReadOnlyColumn(name));
            }

            let coerced = column.kind.coerce(&value).ok_or_else(|| FilterError::InvalidValue {
                column: name.clone(),
                expected: column.kind,
                found: value.to_string(),
            })?;

            Ok((column, coerced))
        })
        .collect::<Result<Vec<_>, FilterError>>()?;

    Ok(UpdateStatement {
        table: E::TABLE,
        columns: E::COLUMNS,
        predicates,
        assignments,
        touch: E::updated_at_column(),
    })
}
