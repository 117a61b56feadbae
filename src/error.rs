//! Typed errors and HTTP mapping.

use crate::query::Filter;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Programming and configuration errors found while assembling models, resources and the Api.
/// Never rendered as an HTTP response.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table} column {column}")]
    InvalidPrimaryKey { table: String, column: String },
    #[error("duplicate model: {0}")]
    DuplicateModel(String),
    #[error("resource '{0}' has no name and no model to derive one from")]
    MissingName(String),
    #[error("resource '{0}' has no schema")]
    MissingSchema(String),
    #[error("resource '{0}' is already registered with another api")]
    AlreadyBound(String),
    #[error("duplicate endpoint: {method} {rule}")]
    DuplicateEndpoint { method: String, rule: String },
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

/// How a missing item was looked up.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(i64),
    Where(Vec<Filter>),
}

/// Storage diagnostics attached to a conflict in debug mode only.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictInfo {
    pub exception_message: String,
    pub statement: Option<String>,
    pub params: Vec<Value>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("item not found in {resource}")]
    ItemNotFound { resource: String, lookup: Lookup },
    #[error("backend conflict")]
    BackendConflict { debug_info: Option<ConflictInfo> },
    #[error("validation failed")]
    Validation(Map<String, Value>),
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Rendered error body, attached to error responses so the api middleware can reshape it.
#[derive(Clone, Debug)]
pub struct ErrorBody(pub Value);

impl AppError {
    pub fn item_not_found(resource: &str, id: i64) -> Self {
        AppError::ItemNotFound {
            resource: resource.to_string(),
            lookup: Lookup::Id(id),
        }
    }

    /// Validation failure on a single field.
    pub fn field(name: &str, message: &str) -> Self {
        let mut messages = Map::new();
        messages.insert(name.to_string(), json!([message]));
        AppError::Validation(messages)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ItemNotFound { .. } | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BackendConflict { .. } => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnknownOperator(_) | AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error body: `{"status", "message"}` or `{"status", "messages"}` plus per-kind detail.
    pub fn as_json(&self) -> Value {
        let status = self.status_code();
        let mut body = Map::new();
        body.insert("status".into(), json!(status.as_u16()));
        match self {
            AppError::Validation(messages) => {
                body.insert("messages".into(), Value::Object(messages.clone()));
            }
            AppError::InvalidQuery(msg) => {
                body.insert("messages".into(), json!(msg));
            }
            AppError::UnknownOperator(op) => {
                body.insert("message".into(), json!(format!("Unknown operator '{}'", op)));
            }
            AppError::ItemNotFound { resource, lookup } => {
                body.insert("message".into(), json!(reason(status)));
                body.insert("item".into(), item_json(resource, lookup));
            }
            AppError::BackendConflict { debug_info } => {
                body.insert("message".into(), json!(reason(status)));
                if let Some(info) = debug_info {
                    body.insert("debug_info".into(), json!(info));
                }
            }
            _ => {
                body.insert("message".into(), json!(reason(status)));
            }
        }
        Value::Object(body)
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

fn item_json(resource: &str, lookup: &Lookup) -> Value {
    match lookup {
        Lookup::Id(id) => json!({ "$type": resource, "$id": id }),
        Lookup::Where(filters) if filters.is_empty() => json!({ "$type": resource, "$where": null }),
        Lookup::Where(filters) => {
            let mut conditions = Map::new();
            for f in filters {
                let mut condition = Map::new();
                condition.insert(format!("${}", f.operator), json!(f.argument));
                conditions.insert(f.name.clone(), Value::Object(condition));
            }
            json!({ "$type": resource, "$where": conditions })
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = self.as_json();
        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(ErrorBody(body));
        response
    }
}
