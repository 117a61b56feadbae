//! Declarative route descriptors.
//!
//! A [`Route`] binds an HTTP method, a URL pattern relative to the resource prefix, a handler
//! and optional request/response schemas. Its relation name is its identity inside a resource.

use crate::error::{AppError, ConfigError};
use crate::model::Record;
use crate::query::QueryParams;
use crate::resource::{Resource, ResourceMeta};
use crate::response::Reply;
use crate::schema::SchemaRef;
use crate::service::Manager;
use crate::store::Session;
use axum::http::Method;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A route body. Receives everything the view resolved for this request.
pub type Handler = Arc<dyn Fn(Call) -> BoxFuture<Result<Reply, AppError>> + Send + Sync>;

/// Wrap an async function into a [`Handler`]. The output may be anything convertible to [`Reply`].
pub fn handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, AppError>> + Send + 'static,
    R: Into<Reply> + 'static,
{
    Arc::new(move |call: Call| -> BoxFuture<Result<Reply, AppError>> {
        let fut = f(call);
        Box::pin(async move { fut.await.map(Into::into) })
    })
}

/// URL pattern of a route: fixed, or computed from the resource it is registered on.
#[derive(Clone)]
pub enum Pattern {
    Literal(String),
    Derived(Arc<dyn Fn(&ResourceMeta) -> String + Send + Sync>),
}

impl Pattern {
    pub fn resolve(&self, meta: &ResourceMeta) -> String {
        match self {
            Pattern::Literal(s) => s.clone(),
            Pattern::Derived(f) => f(meta),
        }
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::Literal(s.to_string())
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Literal(s)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(s) => write!(f, "Literal({:?})", s),
            Pattern::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Default verb of a method in derived relation names.
pub fn default_verb(method: &Method) -> String {
    match *method {
        Method::GET => "read".into(),
        Method::POST | Method::PUT => "create".into(),
        Method::PATCH => "update".into(),
        Method::DELETE => "destroy".into(),
        ref other => other.as_str().to_lowercase(),
    }
}

#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: Option<Pattern>,
    pub attribute: Option<String>,
    pub rel: Option<String>,
    pub request_schema: Option<SchemaRef>,
    pub response_schema: Option<SchemaRef>,
    /// Item routes take an integer `:id` segment and receive the loaded item.
    pub item: bool,
    /// Partial body loading; defaults to true for PATCH.
    pub partial: Option<bool>,
    handler: Handler,
}

impl Route {
    pub fn new(method: Method, handler: Handler) -> Self {
        Route {
            method,
            pattern: None,
            attribute: None,
            rel: None,
            request_schema: None,
            response_schema: None,
            item: false,
            partial: None,
            handler,
        }
    }

    pub fn get(handler: Handler) -> Self {
        Route::new(Method::GET, handler)
    }

    pub fn post(handler: Handler) -> Self {
        Route::new(Method::POST, handler)
    }

    pub fn put(handler: Handler) -> Self {
        Route::new(Method::PUT, handler)
    }

    pub fn patch(handler: Handler) -> Self {
        Route::new(Method::PATCH, handler)
    }

    pub fn delete(handler: Handler) -> Self {
        Route::new(Method::DELETE, handler)
    }

    pub fn rule(mut self, pattern: impl Into<Pattern>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn derived_rule(mut self, f: impl Fn(&ResourceMeta) -> String + Send + Sync + 'static) -> Self {
        self.pattern = Some(Pattern::Derived(Arc::new(f)));
        self
    }

    pub fn attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    pub fn rel(mut self, rel: &str) -> Self {
        self.rel = Some(rel.to_string());
        self
    }

    pub fn request_schema(mut self, schema: SchemaRef) -> Self {
        self.request_schema = Some(schema);
        self
    }

    pub fn response_schema(mut self, schema: SchemaRef) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn item(mut self) -> Self {
        self.item = true;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Same pattern, attribute and item-ness under another method and handler.
    pub fn for_method(&self, method: Method, handler: Handler) -> Route {
        Route {
            pattern: self.pattern.clone(),
            attribute: self.attribute.clone(),
            item: self.item,
            ..Route::new(method, handler)
        }
    }

    /// Identity key: `rel`, or `{verb}_{attribute}`.
    pub fn relation(&self) -> String {
        match &self.rel {
            Some(rel) => rel.clone(),
            None => format!(
                "{}_{}",
                default_verb(&self.method),
                self.attribute.as_deref().unwrap_or_default()
            ),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial.unwrap_or(self.method == Method::PATCH)
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Pattern relative to the resource prefix; `/{attribute}` when none was given.
    pub fn relative_rule(&self, meta: &ResourceMeta) -> String {
        match &self.pattern {
            Some(p) => p.resolve(meta),
            None => format!("/{}", self.attribute.as_deref().unwrap_or_default()),
        }
    }

    /// Full axum path under `route_prefix`. Item routes insert `/:id` before the pattern.
    pub fn build_rule(&self, meta: &ResourceMeta, route_prefix: &str) -> Result<String, ConfigError> {
        let rule = self.relative_rule(meta);
        if !rule.is_empty() && !rule.starts_with('/') {
            return Err(ConfigError::InvalidPattern(rule));
        }
        Ok(if self.item {
            format!("{}/:id{}", route_prefix, rule)
        } else {
            format!("{}{}", route_prefix, rule)
        })
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("relation", &self.relation())
            .field("item", &self.item)
            .finish()
    }
}

/// Everything a handler gets for one request.
pub struct Call {
    pub resource: Arc<Resource>,
    pub session: Box<dyn Session>,
    /// Loaded entity, for item routes.
    pub item: Option<Record>,
    /// Loaded request body, for POST/PUT/PATCH.
    pub properties: Option<Record>,
    /// Parsed querystring, for GET.
    pub query: QueryParams,
    /// Raw path parameters.
    pub params: HashMap<String, String>,
}

impl Call {
    pub fn manager(&self) -> Result<Arc<Manager>, AppError> {
        self.resource.manager().cloned().ok_or_else(|| {
            AppError::Config(ConfigError::MissingReference {
                kind: "manager",
                id: self.resource.name().to_string(),
            })
        })
    }

    pub fn take_item(&mut self) -> Result<Record, AppError> {
        self.item.take().ok_or(AppError::NotFound)
    }

    pub fn take_properties(&mut self) -> Record {
        self.properties.take().unwrap_or_default()
    }

    /// Integer path parameter; anything else is not found.
    pub fn path_id(&self, name: &str) -> Result<i64, AppError> {
        self.params
            .get(name)
            .and_then(|v| v.parse().ok())
            .ok_or(AppError::NotFound)
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRef;

    fn noop() -> Handler {
        handler(|_call: Call| async { Ok::<_, AppError>(()) })
    }

    fn meta() -> ResourceMeta {
        ResourceMeta {
            name: "banks".into(),
            model: Some("bank".into()),
            schema: SchemaRef::Named("BankSchema".into()),
            id_attribute: None,
        }
    }

    #[test]
    fn relation_defaults_to_verb_and_attribute() {
        let r = Route::get(noop()).attribute("stats");
        assert_eq!(r.relation(), "read_stats");
        assert_eq!(r.for_method(Method::PUT, noop()).relation(), "create_stats");
        assert_eq!(r.for_method(Method::PATCH, noop()).relation(), "update_stats");
        assert_eq!(r.for_method(Method::DELETE, noop()).relation(), "destroy_stats");
        assert_eq!(Route::post(noop()).rel("create").relation(), "create");
    }

    #[test]
    fn for_method_keeps_pattern_and_item() {
        let read = Route::get(noop()).rule("").item().attribute("instance").rel("self");
        let update = read.for_method(Method::PATCH, noop()).rel("update");
        assert!(update.item);
        assert_eq!(update.attribute.as_deref(), Some("instance"));
        assert!(update.is_partial());
        assert!(!read.is_partial());
        assert_eq!(update.build_rule(&meta(), "/api/banks").unwrap(), "/api/banks/:id");
    }

    #[test]
    fn rules() {
        let m = meta();
        assert_eq!(Route::get(noop()).rule("").build_rule(&m, "/api/banks").unwrap(), "/api/banks");
        assert_eq!(
            Route::get(noop()).attribute("stats").build_rule(&m, "/api/banks").unwrap(),
            "/api/banks/stats"
        );
        let derived = Route::get(noop()).derived_rule(|meta| format!("/by-{}", meta.name)).item();
        assert_eq!(derived.build_rule(&m, "/api/banks").unwrap(), "/api/banks/:id/by-banks");
        assert!(matches!(
            Route::get(noop()).rule("oops").build_rule(&m, "/api/banks"),
            Err(ConfigError::InvalidPattern(_))
        ));
    }
}
