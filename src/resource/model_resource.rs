//! Default CRUD routes for entity-backed resources.

use crate::error::AppError;
use crate::resource::{Resource, ResourceBuilder};
use crate::response::Reply;
use crate::routes::{handler, Call, Route};
use crate::service::Commit;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};

/// Unpaginated match count of a collection read.
pub const X_TOTAL_COUNT: &str = "x-total-count";

/// Base for model-backed resources:
///
/// | member      | method | rule      | relation    |
/// |-------------|--------|-----------|-------------|
/// | `instances` | GET    | `""`      | `instances` |
/// | `create`    | POST   | `""`      | `create`    |
/// | `self`      | GET    | `/:id`    | `self`      |
/// | `update`    | PATCH  | `/:id`    | `update`    |
/// | `destroy`   | DELETE | `/:id`    | `destroy`   |
pub struct ModelResource;

impl ModelResource {
    /// A builder with the CRUD routes already inherited.
    pub fn builder() -> ResourceBuilder {
        Resource::builder().inherit(ModelResource::routes())
    }

    pub fn routes() -> Vec<(&'static str, Route)> {
        let instances = Route::get(handler(|mut call: Call| async move {
            let manager = call.manager()?;
            let query = std::mem::take(&mut call.query);
            let (items, total) = manager.paginate(call.session(), &query).await?;
            let mut headers = HeaderMap::new();
            headers.insert(X_TOTAL_COUNT, HeaderValue::from(total));
            Ok::<_, AppError>((items, StatusCode::OK, headers))
        }))
        .rule("")
        .rel("instances");

        let create = instances
            .for_method(
                Method::POST,
                handler(|mut call: Call| async move {
                    let manager = call.manager()?;
                    let properties = call.take_properties();
                    let item = manager.create(call.session(), properties, Commit::Now).await?;
                    let mut headers = HeaderMap::new();
                    let location = manager
                        .id_of(&item)
                        .and_then(|id| call.resource.url_for("self", id))
                        .and_then(|url| HeaderValue::from_str(&url).ok());
                    if let Some(location) = location {
                        headers.insert(header::LOCATION, location);
                    }
                    Ok::<_, AppError>((item, StatusCode::CREATED, headers))
                }),
            )
            .rel("create");

        let read = Route::get(handler(|mut call: Call| async move { call.take_item() }))
            .rule("")
            .item()
            .attribute("instance")
            .rel("self");

        let update = read
            .for_method(
                Method::PATCH,
                handler(|mut call: Call| async move {
                    let manager = call.manager()?;
                    let item = call.take_item()?;
                    let changes = call.take_properties();
                    manager.update(call.session(), &item, changes, Commit::Now).await
                }),
            )
            .rel("update");

        let destroy = read
            .for_method(
                Method::DELETE,
                handler(|mut call: Call| async move {
                    let manager = call.manager()?;
                    let item = call.take_item()?;
                    manager.delete(call.session(), &item).await?;
                    Ok::<_, AppError>(Reply::new((), StatusCode::NO_CONTENT))
                }),
            )
            .rel("destroy");

        vec![
            ("instances", instances),
            ("create", create),
            ("self", read),
            ("update", update),
            ("destroy", destroy),
        ]
    }
}
