//! The `example` table

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::repository::{take_column, Column, ColumnKind, Entity, Record, StoreError, Value};

/// One row of the `example` table
///
/// `id`, `created_at` and `updated_at` are assigned by storage and stay `None`
/// until the row has been flushed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExampleModel {
    pub id: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub age: Option<i32>,
}

impl Entity for ExampleModel {
    const NAME: &'static str = "Example";
    const TABLE: &'static str = "example";
    const COLUMNS: &'static [Column] = &[
        Column::identity("id"),
        Column::created_at("created_at"),
        Column::updated_at("updated_at"),
        Column::data("name", ColumnKind::Text),
        Column::data("age", ColumnKind::Integer),
    ];

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn to_record(&self) -> Record {
        Record::from([
            ("name".to_string(), Value::from(self.name.clone())),
            ("age".to_string(), Value::from(self.age)),
        ])
    }

    fn from_record(mut record: Record) -> Result<Self, StoreError> {
        Ok(Self {
            id: Some(take_column(&mut record, "id")?),
            created_at: Some(take_column(&mut record, "created_at")?),
            updated_at: Some(take_column(&mut record, "updated_at")?),
            name: take_column(&mut record, "name")?,
            age: take_column(&mut record, "age")?,
        })
    }
}
