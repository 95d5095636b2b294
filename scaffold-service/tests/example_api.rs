//! End-to-end tests for the `/example` routes over the in-memory store

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as Json};
use tower::ServiceExt;

use scaffold_service::prelude::*;

fn test_app() -> (Router, MemoryStore) {
    let store = MemoryStore::for_entity::<ExampleModel>();
    let usecase =
        ExampleUsecase::new(store.clone(), store.clone(), NoopPublisher).with_batch_size(2);
    let state = AppState::new(Config::default(), usecase);
    (app(state), store)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Json) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, location, body)
}

fn json_request(method: &str, uri: &str, body: Json) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn create(app: &Router, name: &str, age: i32) -> Json {
    let (status, _, body) = send(
        app,
        json_request("POST", "/example", json!({ "name": name, "age": age })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_create_returns_location_and_row() {
    let (app, store) = test_app();

    let (status, location, body) = send(
        &app,
        json_request("POST", "/example", json!({ "name": "alice", "age": 30 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap();
    assert_eq!(location.as_deref(), Some(format!("/example/{id}").as_str()));
    assert_eq!(body["name"], "alice");
    assert_eq!(body["age"], 30);
    assert_eq!(body["created_at"], body["updated_at"]);
    assert_eq!(store.rows("example").len(), 1);
}

#[tokio::test]
async fn test_get_one_and_missing() {
    let (app, _) = test_app();
    let created = create(&app, "alice", 30).await;
    let id = created["id"].as_str().unwrap();

    let (status, _, body) = send(&app, empty_request("GET", &format!("/example/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, created);

    let missing = uuid::Uuid::new_v4();
    let (status, _, body) =
        send(&app, empty_request("GET", &format!("/example/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_query_filters_and_links() {
    let (app, _) = test_app();
    for (name, age) in [("ann", 20), ("bob", 35), ("cid", 40), ("dan", 50)] {
        create(&app, name, age).await;
    }

    let (status, _, body) = send(
        &app,
        empty_request("GET", "/example?age__gte=35&limit=2&offset=0"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let names: Vec<&str> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bob", "cid"]);
    assert_eq!(body["next"], "/example?age__gte=35&limit=2&offset=2");
    assert_eq!(body["previous"], "/example?age__gte=35&limit=2&offset=0");

    let (_, _, page) = send(
        &app,
        empty_request("GET", "/example?age__gte=35&limit=2&offset=2"),
    )
    .await;
    assert_eq!(page["count"], 1);
    assert_eq!(page["results"][0]["name"], "dan");
}

#[tokio::test]
async fn test_query_links_are_absolute_with_host() {
    let (app, _) = test_app();
    create(&app, "ann", 20).await;

    let request = Request::builder()
        .method("GET")
        .uri("/example?limit=1")
        .header(header::HOST, "api.local:8080")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next"], "http://api.local:8080/example?limit=1&offset=1");
    assert_eq!(body["previous"], "http://api.local:8080/example?limit=1&offset=0");
}

#[tokio::test]
async fn test_query_with_in_filter() {
    let (app, _) = test_app();
    for (name, age) in [("ann", 20), ("bob", 35), ("cid", 40)] {
        create(&app, name, age).await;
    }

    let (status, _, body) = send(&app, empty_request("GET", "/example?name__in=ann,cid")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_query_rejects_bad_filters() {
    let (app, _) = test_app();

    let (status, _, body) = send(&app, empty_request("GET", "/example?age__between=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FILTER");

    let (status, _, body) = send(&app, empty_request("GET", "/example?height=3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FILTER");

    let (status, _, _) = send(&app, empty_request("GET", "/example?limit=-1")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let (app, store) = test_app();

    let (status, _, body) = send(
        &app,
        json_request("POST", "/example", json!({ "name": "al", "age": 200 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["name"][0]["code"], "TOO_SHORT");
    assert_eq!(body["errors"]["age"][0]["code"], "OUT_OF_RANGE");
    assert!(store.rows("example").is_empty());
}

#[tokio::test]
async fn test_partial_update_touches_only_given_fields() {
    let (app, _) = test_app();
    let created = create(&app, "alice", 30).await;
    let id = created["id"].as_str().unwrap();

    let (status, _, body) = send(
        &app,
        json_request("PATCH", &format!("/example/{id}"), json!({ "age": 31 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "alice");
    assert_eq!(body["age"], 31);
    assert_eq!(body["created_at"], created["created_at"]);

    let missing = uuid::Uuid::new_v4();
    let (status, _, _) = send(
        &app,
        json_request("PATCH", &format!("/example/{missing}"), json!({ "age": 31 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_patch_is_bad_request() {
    let (app, _) = test_app();
    let created = create(&app, "alice", 30).await;
    let id = created["id"].as_str().unwrap();

    let (status, _, _) = send(
        &app,
        json_request("PATCH", &format!("/example/{id}"), json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_then_get() {
    let (app, store) = test_app();
    let created = create(&app, "alice", 30).await;
    let id = created["id"].as_str().unwrap();

    let (status, _, body) = send(&app, empty_request("DELETE", &format!("/example/{id}"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Json::Null);
    assert!(store.rows("example").is_empty());

    let (status, _, _) = send(&app, empty_request("DELETE", &format!("/example/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_insert_batches() {
    let (app, store) = test_app();
    let items: Vec<Json> = (0..5)
        .map(|i| json!({ "name": format!("bulk-{i}"), "age": 20 + i }))
        .collect();

    let (status, _, body) = send(
        &app,
        json_request("POST", "/example/bulk_insert", json!({ "items": items })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted_rows"], 5);
    assert_eq!(body["batches"], 3);
    assert!(body["elapsed_time"].as_f64().unwrap() >= 0.0);
    assert_eq!(store.copy_calls(), vec![2, 2, 1]);
    assert_eq!(store.rows("example").len(), 5);
}

#[tokio::test]
async fn test_bulk_insert_rejects_invalid_items() {
    let (app, store) = test_app();

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/example/bulk_insert",
            json!({ "items": [{ "name": "alice", "age": 30 }, { "name": "x", "age": 1 }] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"].get("items[1].name").is_some());
    assert_eq!(store.copy_sinks_acquired(), 0);

    let (status, _, _) = send(
        &app,
        json_request("POST", "/example/bulk_insert", json!({ "items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
