//! The example entity: model, schemas, usecase, HTTP routes and inbound events

pub mod consumer;
mod handlers;
mod model;
pub mod schema;
mod usecase;

pub use consumer::{ConsumeReport, ExampleEventConsumer};
pub use handlers::router;
pub use model::ExampleModel;
pub use schema::{
    BulkInsertCreate, BulkInsertResponse, CollectionResponse, ExampleCreate, ExampleQueryParams,
    ExampleResponse, ExampleUpdate,
};
pub use usecase::ExampleUsecase;
