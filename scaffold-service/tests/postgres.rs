//! Live PostgreSQL tests
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::collections::BTreeMap;

use scaffold_service::example::{
    BulkInsertCreate, ExampleCreate, ExampleQueryParams, ExampleUpdate,
};
use scaffold_service::prelude::*;

async fn connect() -> AppState {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let mut config = Config::default();
    config.database.url = url;
    config.database.max_retries = 1;
    AppState::connect(config).await.unwrap()
}

fn item(name: &str, age: i32) -> ExampleCreate {
    ExampleCreate {
        name: Some(name.to_string()),
        age: Some(age),
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_crud_round_trip() {
    let state = connect().await;
    let examples = state.examples();
    let name = format!("pg-{}", uuid::Uuid::new_v4().simple());

    let created = examples.create(item(&name, 40)).await.unwrap();
    assert_eq!(created.name.as_deref(), Some(name.as_str()));
    assert_eq!(examples.get(created.id).await.unwrap(), created);

    let updated = examples
        .partial_update(
            ExampleUpdate {
                name: None,
                age: Some(41),
            },
            created.id,
        )
        .await
        .unwrap();
    assert_eq!(updated.age, Some(41));
    assert_eq!(updated.name, created.name);
    assert!(updated.updated_at >= created.updated_at);

    examples.delete(created.id).await.unwrap();
    let err = examples.get(created.id).await.unwrap_err();
    assert!(matches!(err, Error::Repository(ref e) if e.is_not_found()));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_bulk_insert_and_query() {
    let state = connect().await;
    let examples = state.examples();
    let prefix = uuid::Uuid::new_v4().simple().to_string();
    let names: Vec<String> = (0..7).map(|i| format!("{prefix}-{i}")).collect();

    let response = examples
        .bulk_insert(BulkInsertCreate {
            items: names.iter().map(|n| item(n, 50)).collect(),
        })
        .await
        .unwrap();
    assert_eq!(response.inserted_rows, 7);

    let raw = BTreeMap::from([
        ("name__in".to_string(), names.join(",")),
        ("limit".to_string(), "100".to_string()),
    ]);
    let params = ExampleQueryParams::from_query(raw).unwrap();
    let uri: http::Uri = "/example?limit=100".parse().unwrap();
    let page = examples.query(&params, &uri).await.unwrap();
    assert_eq!(page.count, 7);

    for row in page.results {
        examples.delete(row.id).await.unwrap();
    }
}
