//! HTTP handlers for `/example`

use std::collections::BTreeMap;

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, Uri},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::schema::{
    BulkInsertCreate, BulkInsertResponse, CollectionResponse, ExampleCreate, ExampleQueryParams,
    ExampleResponse, ExampleUpdate,
};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::repository::{ConnectionProvider, CopyChannel};
use crate::responses::{Created, NoContent};
use crate::state::AppState;

/// Routes for the example resource
pub fn router<P, B, E>() -> Router<AppState<P, B, E>>
where
    P: ConnectionProvider + 'static,
    B: CopyChannel + 'static,
    E: EventPublisher,
{
    Router::new()
        .route("/example", get(query::<P, B, E>).post(create::<P, B, E>))
        .route("/example/bulk_insert", post(bulk_insert::<P, B, E>))
        .route(
            "/example/{id}",
            get(get_one::<P, B, E>)
                .patch(partial_update::<P, B, E>)
                .delete(delete::<P, B, E>),
        )
}

async fn get_one<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExampleResponse>>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    Ok(Json(state.examples().get(id).await?))
}

async fn query<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(raw): Query<BTreeMap<String, String>>,
) -> Result<Json<CollectionResponse<ExampleResponse>>>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    let params = ExampleQueryParams::from_query(raw)?;
    let uri = absolute_uri(&headers, uri);
    Ok(Json(state.examples().query(&params, &uri).await?))
}

/// `uri` with scheme and authority taken from the request headers
///
/// Falls back to the relative form without a usable `Host` header.
fn absolute_uri(headers: &HeaderMap, uri: Uri) -> Uri {
    let Some(host) = headers.get(header::HOST).and_then(|h| h.to_str().ok()) else {
        return uri;
    };
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("http");

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Uri::builder()
        .scheme(scheme)
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .unwrap_or(uri)
}

async fn create<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    Json(data): Json<ExampleCreate>,
) -> Result<Created<ExampleResponse>>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    data.validate()?;
    let created = state.examples().create(data).await?;
    let location = format!("/example/{}", created.id);
    Ok(Created::new(created).with_location(location))
}

async fn bulk_insert<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    Json(data): Json<BulkInsertCreate<ExampleCreate>>,
) -> Result<Json<BulkInsertResponse>>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    data.validate()?;
    Ok(Json(state.examples().bulk_insert(data).await?))
}

async fn partial_update<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    Path(id): Path<Uuid>,
    Json(data): Json<ExampleUpdate>,
) -> Result<Json<ExampleResponse>>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    data.validate()?;
    Ok(Json(state.examples().partial_update(data, id).await?))
}

async fn delete<P, B, E>(
    State(state): State<AppState<P, B, E>>,
    Path(id): Path<Uuid>,
) -> Result<NoContent>
where
    P: ConnectionProvider,
    B: CopyChannel,
    E: EventPublisher,
{
    state.examples().delete(id).await?;
    Ok(NoContent)
}
