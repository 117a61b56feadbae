//! The request pipeline every registered route runs through:
//! path params, item load, body load, querystring, handler, response schema.

use crate::error::AppError;
use crate::query::{parse_querystring, QueryParams};
use crate::resource::Resource;
use crate::response::{json_response, Payload, Reply};
use crate::routes::route::{Call, Route};
use crate::model::Record;
use crate::schema::{FieldKind, Schema, SchemaRegistry};
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{FromRequestParts, Path, Query, Request},
    http::{request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Request bodies larger than this are rejected.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// One route bound to one resource, ready to serve.
pub struct View {
    pub(crate) resource: Arc<Resource>,
    pub(crate) route: Route,
    pub(crate) endpoint: String,
    pub(crate) state: AppState,
    pub(crate) request_schema: Arc<Schema>,
    pub(crate) response_schema: Arc<Schema>,
}

impl View {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub async fn dispatch(view: Arc<View>, req: Request) -> Response {
    tracing::debug!(endpoint = %view.endpoint, method = %req.method(), path = %req.uri().path(), "dispatch");
    match run(&view, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn run(view: &View, req: Request) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();
    let params = path_params(&mut parts).await;

    // integer segments only; anything else is a routing miss
    let id = match view.route.item {
        true => match params.get("id").and_then(|v| v.parse::<i64>().ok()) {
            Some(id) => Some(id),
            None => return Ok(StatusCode::NOT_FOUND.into_response()),
        },
        false => None,
    };
    if params.get("target_id").is_some_and(|v| v.parse::<i64>().is_err()) {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let mut session = view.state.store.session().await?;
    let item = match id {
        Some(id) => {
            let manager = view.resource.manager().ok_or(AppError::NotFound)?;
            Some(manager.read(session.as_mut(), id).await?)
        }
        None => None,
    };

    let properties = if matches!(parts.method, Method::POST | Method::PUT | Method::PATCH) {
        let payload = read_json(body).await?;
        Some(
            view.request_schema
                .load(&payload, view.route.is_partial(), &view.state.schemas)?,
        )
    } else {
        None
    };

    let query = if parts.method == Method::GET {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::InvalidQuery(e.body_text()))?;
        let mut query = parse_querystring(pairs)?;
        to_attributes(&mut query, &view.response_schema, &view.state.schemas);
        query
    } else {
        QueryParams::default()
    };
    let fields = query.fields.clone();

    let call = Call {
        resource: view.resource.clone(),
        session,
        item,
        properties,
        query,
        params,
    };
    let mut reply = (view.route.handler())(call).await?;
    load_nested(view, &mut reply, &fields).await?;
    Ok(render(view, reply, &fields))
}

/// Filters and sorts name schema fields; storage knows them by attribute.
/// Names the schema does not declare pass through unchanged.
fn to_attributes(query: &mut QueryParams, schema: &Schema, schemas: &SchemaRegistry) {
    for filter in &mut query.filters {
        let Some(field) = schema.get(&filter.name) else {
            continue;
        };
        if let (FieldKind::Nested { schema: nested, .. }, Some(other)) = (&field.kind, filter.other.as_mut()) {
            let key = schemas
                .resolve(nested)
                .and_then(|n| n.attribute_of(other.as_str()).map(str::to_string));
            if let Some(key) = key {
                *other = key;
            }
        }
        filter.name = field.key().to_string();
    }
    for sort in &mut query.sort {
        if let Some(key) = schema.attribute_of(&sort.field) {
            sort.field = key.to_string();
        }
    }
}

/// Fill the to-many nested fields of the resource's own schema from the matching
/// associations, unless the projection leaves them out.
async fn load_nested(view: &View, reply: &mut Reply, fields: &[String]) -> Result<(), AppError> {
    if view.route.response_schema.is_some() {
        return Ok(());
    }
    let Some(manager) = view.resource.manager() else {
        return Ok(());
    };
    let Reply::Data { payload, .. } = reply else {
        return Ok(());
    };
    let records: Vec<&mut Record> = match payload {
        Payload::One(record) => vec![record],
        Payload::Many(records) => records.iter_mut().collect(),
        Payload::Empty => return Ok(()),
    };
    let associations: Vec<&str> = view
        .response_schema
        .fields
        .iter()
        .filter(|f| !f.load_only && matches!(f.kind, FieldKind::Nested { many: true, .. }))
        .filter(|f| fields.is_empty() || fields.iter().any(|n| *n == f.name))
        .map(|f| f.key())
        .filter(|key| manager.model().association(key).is_some())
        .collect();
    if associations.is_empty() || records.is_empty() {
        return Ok(());
    }

    let mut session = view.state.store.session().await?;
    for record in records {
        for name in &associations {
            if record.contains_key(*name) {
                continue;
            }
            let related = manager.relation_instances(session.as_mut(), record, name).await?;
            record.insert(
                name.to_string(),
                Value::Array(related.into_iter().map(Value::Object).collect()),
            );
        }
    }
    Ok(())
}

async fn path_params(parts: &mut Parts) -> HashMap<String, String> {
    match Path::<HashMap<String, String>>::from_request_parts(parts, &()).await {
        Ok(Path(params)) => params,
        Err(_) => HashMap::new(),
    }
}

/// An empty body loads as `{}` so required-field errors still come back per field.
async fn read_json(body: Body) -> Result<Value, AppError> {
    let bytes = to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|_| schema_error("Request body too large or unreadable."))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(&bytes).map_err(|_| schema_error("Invalid JSON body."))
}

fn schema_error(message: &str) -> AppError {
    AppError::field("_schema", message)
}

fn render(view: &View, reply: Reply, fields: &[String]) -> Response {
    match reply {
        Reply::Raw(response) => response,
        Reply::Data {
            payload,
            status,
            headers,
        } => {
            let schemas = &view.state.schemas;
            let body = match payload {
                Payload::Empty => None,
                Payload::One(record) => Some(view.response_schema.dump(&record, fields, schemas)),
                Payload::Many(records) => Some(view.response_schema.dump_many(&records, fields, schemas)),
            };
            json_response(status, body.as_ref(), headers, view.state.debug)
        }
    }
}
