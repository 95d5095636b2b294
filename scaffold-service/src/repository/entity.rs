//! Entity trait and column registry
//!
//! Every persisted type declares a static column table. The filter compiler
//! resolves field names against it, the storage layer uses it to decode rows,
//! and [`validate_schema`] checks it once at startup.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StoreError;
use super::value::{Record, Value};

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// `uuid`
    Uuid,
    /// `text`
    Text,
    /// `integer` (32-bit)
    Integer,
    /// `bigint`
    BigInt,
    /// `double precision`
    Double,
    /// `boolean`
    Boolean,
    /// `timestamptz`
    Timestamp,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid => write!(f, "uuid"),
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::BigInt => write!(f, "bigint"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "boolean"),
            Self::Timestamp => write!(f, "timestamp"),
        }
    }
}

impl ColumnKind {
    /// Coerce `value` into this kind
    ///
    /// Text is parsed; integers widen to doubles. `NULL` passes through.
    /// Returns `None` when the value cannot represent this kind.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (_, Value::List(_)) => None,

            (Self::Uuid, Value::Uuid(id)) => Some(Value::Uuid(*id)),
            (Self::Uuid, Value::Text(s)) => Uuid::parse_str(s.trim()).ok().map(Value::Uuid),

            (Self::Text, Value::Text(s)) => Some(Value::Text(s.clone())),

            (Self::Integer, Value::Int(n)) => i32::try_from(*n).ok().map(|_| Value::Int(*n)),
            (Self::Integer, Value::Text(s)) => s.trim().parse::<i32>().ok().map(Value::from),
            (Self::BigInt, Value::Int(n)) => Some(Value::Int(*n)),
            (Self::BigInt, Value::Text(s)) => s.trim().parse::<i64>().ok().map(Value::Int),

            (Self::Double, Value::Float(n)) => Some(Value::Float(*n)),
            (Self::Double, Value::Int(n)) => Some(Value::Float(*n as f64)),
            (Self::Double, Value::Text(s)) => s.trim().parse::<f64>().ok().map(Value::Float),

            (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },

            (Self::Timestamp, Value::Timestamp(ts)) => Some(Value::Timestamp(*ts)),
            (Self::Timestamp, Value::Text(s)) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),

            _ => None,
        }
    }
}

/// What a column means to the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    /// Primary identity, assigned by storage
    Identity,
    /// Creation timestamp, assigned by storage
    CreatedAt,
    /// Last-update timestamp, bumped by storage on every update
    UpdatedAt,
    /// Caller-owned data
    Data,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::CreatedAt => write!(f, "created_at"),
            Self::UpdatedAt => write!(f, "updated_at"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// One entry of an entity's column table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub role: ColumnRole,
}

impl Column {
    pub const fn identity(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Uuid, role: ColumnRole::Identity }
    }

    pub const fn created_at(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Timestamp, role: ColumnRole::CreatedAt }
    }

    pub const fn updated_at(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Timestamp, role: ColumnRole::UpdatedAt }
    }

    pub const fn data(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind, role: ColumnRole::Data }
    }

    /// Whether callers may assign this column
    pub fn is_writable(&self) -> bool {
        self.role == ColumnRole::Data
    }
}

/// A persisted record type with storage-assigned identity and timestamps
///
/// Implementors describe their table through [`Entity::COLUMNS`] and convert
/// to and from [`Record`]s; the repository does the rest.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable type name used in errors and logs
    const NAME: &'static str;

    /// Storage table
    const TABLE: &'static str;

    /// Column table, in select order
    const COLUMNS: &'static [Column];

    /// Identity, once storage has assigned one
    fn id(&self) -> Option<Uuid>;

    /// Caller-owned column values written on insert
    fn to_record(&self) -> Record;

    /// Build from a full row
    fn from_record(record: Record) -> Result<Self, StoreError>;

    /// Look up a column by name
    fn column(name: &str) -> Option<&'static Column> {
        Self::COLUMNS.iter().find(|c| c.name == name)
    }

    /// Look up the column carrying `role`
    fn column_with_role(role: ColumnRole) -> Option<&'static Column> {
        Self::COLUMNS.iter().find(|c| c.role == role)
    }

    /// Name of the identity column
    fn identity_column() -> &'static str {
        Self::column_with_role(ColumnRole::Identity).map_or("id", |c| c.name)
    }

    /// Name of the last-update column
    fn updated_at_column() -> &'static str {
        Self::column_with_role(ColumnRole::UpdatedAt).map_or("updated_at", |c| c.name)
    }
}

/// A column table that cannot back the repository
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("entity {entity} declares no columns")]
    Empty { entity: &'static str },

    #[error("entity {entity} declares column `{column}` twice")]
    DuplicateColumn { entity: &'static str, column: &'static str },

    #[error("entity {entity} must declare exactly one {role} column, found {found}")]
    RoleCount { entity: &'static str, role: ColumnRole, found: usize },

    #[error("column `{column}` of entity {entity} must be {expected}, declared {declared}")]
    WrongKind {
        entity: &'static str,
        column: &'static str,
        expected: ColumnKind,
        declared: ColumnKind,
    },
}

/// Check an entity's column table
///
/// Requires exactly one identity column of kind uuid, one creation and one
/// update timestamp, and unique column names.
pub fn validate_schema<E: Entity>() -> Result<(), SchemaError> {
    if E::COLUMNS.is_empty() {
        return Err(SchemaError::Empty { entity: E::NAME });
    }

    let mut seen = BTreeSet::new();
    for column in E::COLUMNS {
        if !seen.insert(column.name) {
            return Err(SchemaError::DuplicateColumn {
                entity: E::NAME,
                column: column.name,
            });
        }
    }

    let required = [
        (ColumnRole::Identity, ColumnKind::Uuid),
        (ColumnRole::CreatedAt, ColumnKind::Timestamp),
        (ColumnRole::UpdatedAt, ColumnKind::Timestamp),
    ];
    for (role, expected) in required {
        let matching: Vec<&Column> = E::COLUMNS.iter().filter(|c| c.role == role).collect();
        match matching.as_slice() {
            [column] if column.kind == expected => {}
            [column] => {
                return Err(SchemaError::WrongKind {
                    entity: E::NAME,
                    column: column.name,
                    expected,
                    declared: column.kind,
                })
            }
            other => {
                return Err(SchemaError::RoleCount {
                    entity: E::NAME,
                    role,
                    found: other.len(),
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Broken;

    impl Entity for Broken {
        const NAME: &'static str = "Broken";
        const TABLE: &'static str = "broken";
        const COLUMNS: &'static [Column] = &[
            Column::identity("id"),
            Column::created_at("created_at"),
            Column::data("label", ColumnKind::Text),
            Column::data("label", ColumnKind::Text),
        ];

        fn id(&self) -> Option<Uuid> {
            None
        }

        fn to_record(&self) -> Record {
            Record::new()
        }

        fn from_record(_record: Record) -> Result<Self, StoreError> {
            Ok(Broken)
        }
    }

    #[derive(Clone)]
    struct NoUpdatedAt;

    impl Entity for NoUpdatedAt {
        const NAME: &'static str = "NoUpdatedAt";
        const TABLE: &'static str = "no_updated_at";
        const COLUMNS: &'static [Column] = &[
            Column::identity("id"),
            Column::created_at("created_at"),
        ];

        fn id(&self) -> Option<Uuid> {
            None
        }

        fn to_record(&self) -> Record {
            Record::new()
        }

        fn from_record(_record: Record) -> Result<Self, StoreError> {
            Ok(NoUpdatedAt)
        }
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let err = validate_schema::<Broken>().unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateColumn {
                entity: "Broken",
                column: "label"
            }
        );
    }

    #[test]
    fn test_missing_role_rejected() {
        let err = validate_schema::<NoUpdatedAt>().unwrap_err();
        assert_eq!(
            err,
            SchemaError::RoleCount {
                entity: "NoUpdatedAt",
                role: ColumnRole::UpdatedAt,
                found: 0
            }
        );
    }

    #[test]
    fn test_coerce_from_text() {
        assert_eq!(
            ColumnKind::Integer.coerce(&Value::Text(" 42 ".into())),
            Some(Value::Int(42))
        );
        assert_eq!(
            ColumnKind::Double.coerce(&Value::Int(3)),
            Some(Value::Float(3.0))
        );
        assert_eq!(
            ColumnKind::Boolean.coerce(&Value::Text("TRUE".into())),
            Some(Value::Bool(true))
        );

        let id = Uuid::new_v4();
        assert_eq!(
            ColumnKind::Uuid.coerce(&Value::Text(id.to_string())),
            Some(Value::Uuid(id))
        );
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        assert_eq!(ColumnKind::Integer.coerce(&Value::Text("forty".into())), None);
        assert_eq!(ColumnKind::Integer.coerce(&Value::Int(i64::MAX)), None);
        assert_eq!(ColumnKind::Text.coerce(&Value::Int(1)), None);
        assert_eq!(ColumnKind::Uuid.coerce(&Value::List(vec![])), None);
    }

    #[test]
    fn test_coerce_null_passes_through() {
        assert_eq!(ColumnKind::Timestamp.coerce(&Value::Null), Some(Value::Null));
    }

    #[test]
    fn test_coerce_timestamp_normalizes_offset() {
        let value = ColumnKind::Timestamp
            .coerce(&Value::Text("2024-01-01T02:00:00+02:00".into()))
            .unwrap();
        let expected: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(value, Value::Timestamp(expected));
    }
}
