//! Nobix API: declarative REST resources over PostgreSQL (or memory), served with axum.

pub mod api;
pub mod domain;
pub mod error;
pub mod migration;
pub mod model;
pub mod query;
pub mod resource;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use api::Api;
pub use error::{AppError, ConfigError};
pub use migration::{create_tables, drop_tables, ensure_database_exists};
pub use model::{Model, ModelRegistry, Record};
pub use query::{parse_querystring, Filter, QueryParams, Sort};
pub use resource::{ModelResource, Resource};
pub use response::Reply;
pub use routes::{common_routes, cors_layer, handler, Call, Relation, Route, RouteSet};
pub use schema::{Field, Schema, SchemaRef, SchemaRegistry};
pub use service::{Commit, Manager};
pub use settings::{Mode, Settings};
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Session, Store, StoreError};
