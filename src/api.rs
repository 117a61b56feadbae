//! The Api registry: binds resources under a URL prefix, builds their views and installs
//! the error-shaping middleware on the host router.

use crate::error::{ConfigError, ErrorBody};
use crate::resource::Resource;
use crate::response::{json_response, render_json};
use crate::routes::{api_index, dispatch, View, BODY_LIMIT};
use crate::schema::{Schema, SchemaRef};
use crate::service::Manager;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::{get, MethodFilter, MethodRouter},
    Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_API: AtomicU64 = AtomicU64::new(1);

pub struct Api {
    id: u64,
    prefix: String,
    state: AppState,
    resources: Vec<Arc<Resource>>,
    views: Vec<(String, Arc<View>)>,
}

impl Api {
    /// `prefix` is normalised to no trailing slash; `""` mounts at the root.
    pub fn new(prefix: &str, state: AppState) -> Self {
        Api {
            id: NEXT_API.fetch_add(1, Ordering::Relaxed),
            prefix: prefix.trim_end_matches('/').to_string(),
            state,
            resources: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// `(method, rule, endpoint)` of every view, in registration order.
    pub fn endpoints(&self) -> impl Iterator<Item = (&Method, &str, &str)> {
        self.views
            .iter()
            .map(|(rule, view)| (&view.route.method, rule.as_str(), view.endpoint()))
    }

    /// Bind `resource` to this api. Registering the same resource twice is a no-op;
    /// a resource already bound to another api is an error.
    pub fn register(&mut self, resource: Arc<Resource>) -> Result<(), ConfigError> {
        if self.resources.iter().any(|r| Arc::ptr_eq(r, &resource)) {
            return Ok(());
        }
        if resource.bound_api().is_some_and(|api| api != self.id) {
            return Err(ConfigError::AlreadyBound(resource.name().to_string()));
        }

        let meta = resource.meta();
        let manager = match &meta.model {
            Some(table) => {
                let model = self.state.models.get(table).cloned().ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: table.clone(),
                })?;
                let manager = Manager::new(
                    &meta.name,
                    model,
                    self.state.models.clone(),
                    meta.id_attribute.as_deref(),
                    self.state.debug,
                )?;
                Some(Arc::new(manager))
            }
            None => None,
        };
        let route_prefix = format!("{}/{}", self.prefix, meta.name);

        let mut views = Vec::new();
        for (relation, route) in resource.routes() {
            if method_filter(&route.method).is_none() {
                return Err(ConfigError::UnsupportedMethod(route.method.to_string()));
            }
            let rule = route.build_rule(meta, &route_prefix)?;
            let taken = self
                .views
                .iter()
                .chain(views.iter())
                .any(|(r, v): &(String, Arc<View>)| *r == rule && v.route.method == route.method);
            if taken {
                return Err(ConfigError::DuplicateEndpoint {
                    method: route.method.to_string(),
                    rule,
                });
            }
            let request_schema = self.schema(route.request_schema.as_ref().unwrap_or(&meta.schema))?;
            let response_schema = self.schema(route.response_schema.as_ref().unwrap_or(&meta.schema))?;
            let view = View {
                resource: resource.clone(),
                route: route.clone(),
                endpoint: format!("{}_{}", meta.name, relation),
                state: self.state.clone(),
                request_schema,
                response_schema,
            };
            views.push((rule, Arc::new(view)));
        }

        resource.bind(self.id, route_prefix, manager)?;
        for (rule, view) in &views {
            tracing::debug!(endpoint = %view.endpoint(), method = %view.route.method, rule = %rule, "route installed");
        }
        self.views.extend(views);
        self.resources.push(resource);
        Ok(())
    }

    fn schema(&self, schema: &SchemaRef) -> Result<Arc<Schema>, ConfigError> {
        self.state.schemas.resolve(schema).ok_or_else(|| ConfigError::MissingReference {
            kind: "schema",
            id: match schema {
                SchemaRef::Named(name) => name.clone(),
                SchemaRef::Inline(s) => s.name.clone(),
            },
        })
    }

    /// Standalone router holding only this api.
    pub fn into_router(self) -> Router {
        self.attach(Router::new())
    }

    /// Merge every view and the api index into `app`, then wrap the result with the
    /// error-shaping middleware. Consumes the api, so it is installed once.
    pub fn attach(self, app: Router) -> Router {
        let mut rules: Vec<(String, Vec<Arc<View>>)> = Vec::new();
        for (rule, view) in self.views {
            match rules.iter_mut().find(|(r, _)| *r == rule) {
                Some((_, views)) => views.push(view),
                None => rules.push((rule, vec![view])),
            }
        }

        let index = if self.prefix.is_empty() { "/" } else { self.prefix.as_str() };
        let mut api = Router::new().route(index, get(api_index));
        for (rule, views) in rules {
            let mut methods = MethodRouter::new();
            for view in views {
                let Some(filter) = method_filter(&view.route.method) else {
                    continue;
                };
                methods = methods.on(filter, move |req: Request| {
                    let view = view.clone();
                    async move { dispatch(view, req).await }
                });
            }
            api = api.route(&rule, methods);
        }

        let shaping = Shaping {
            prefix: self.prefix,
            debug: self.state.debug,
        };
        app.merge(api).layer(from_fn_with_state(shaping, shape_errors))
    }
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    Some(match *method {
        Method::GET => MethodFilter::GET,
        Method::POST => MethodFilter::POST,
        Method::PUT => MethodFilter::PUT,
        Method::PATCH => MethodFilter::PATCH,
        Method::DELETE => MethodFilter::DELETE,
        Method::HEAD => MethodFilter::HEAD,
        Method::OPTIONS => MethodFilter::OPTIONS,
        _ => return None,
    })
}

#[derive(Clone)]
struct Shaping {
    prefix: String,
    debug: bool,
}

impl Shaping {
    fn covers(&self, path: &str) -> bool {
        self.prefix.is_empty()
            || path == self.prefix
            || path.strip_prefix(&self.prefix).is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Application errors are re-rendered pretty in debug mode. Other error responses under the
/// api prefix (routing misses, wrong methods) become `{"status", "messages"}`.
async fn shape_errors(State(shaping): State<Shaping>, req: Request, next: Next) -> Response {
    let in_api = shaping.covers(req.uri().path());
    let response = next.run(req).await;

    if let Some(ErrorBody(body)) = response.extensions().get::<ErrorBody>().cloned() {
        if !shaping.debug {
            return response;
        }
        let (mut parts, _) = response.into_parts();
        parts.headers.remove(header::CONTENT_LENGTH);
        return Response::from_parts(parts, Body::from(render_json(&body, true)));
    }

    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !in_api || status.as_u16() < 400 || is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let text = match to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Err(_) => String::new(),
    };
    let messages = if text.is_empty() { reason(status).to_string() } else { text };
    let mut headers = parts.headers;
    headers.remove(header::CONTENT_LENGTH);
    let body = json!({ "status": status.as_u16(), "messages": messages });
    json_response(status, Some(&body), headers, shaping.debug)
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelRegistry};
    use crate::resource::ModelResource;
    use crate::routes::{handler, Call, Route};
    use crate::schema::{Field, SchemaRegistry};
    use crate::store::MemoryStore;

    fn state() -> AppState {
        let models = Arc::new(ModelRegistry::from_models(vec![Model::new("bank")]).unwrap());
        let schema = Schema::new("BankSchema").field(Field::integer("id").dump_only());
        let schemas = Arc::new(SchemaRegistry::from_schemas(vec![Arc::new(schema)]).unwrap());
        AppState::new(Arc::new(MemoryStore::new(models.clone())), models, schemas, false)
    }

    fn banks() -> Arc<Resource> {
        Arc::new(
            ModelResource::builder()
                .name("banks")
                .model("bank")
                .schema(SchemaRef::Named("BankSchema".into()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn register_is_idempotent_and_exclusive() {
        let resource = banks();
        let mut api = Api::new("/api/", state());
        api.register(resource.clone()).unwrap();
        api.register(resource.clone()).unwrap();
        assert_eq!(api.resources().len(), 1);
        assert_eq!(resource.route_prefix(), Some("/api/banks"));
        assert!(resource.manager().is_some());

        let mut other = Api::new("/v2", state());
        assert!(matches!(other.register(resource), Err(ConfigError::AlreadyBound(_))));
    }

    #[test]
    fn endpoints_are_named_after_relations() {
        let mut api = Api::new("/api", state());
        api.register(banks()).unwrap();
        let endpoints: Vec<(String, String, String)> = api
            .endpoints()
            .map(|(m, r, e)| (m.to_string(), r.to_string(), e.to_string()))
            .collect();
        assert_eq!(endpoints[0], ("GET".into(), "/api/banks".into(), "banks_instances".into()));
        assert_eq!(endpoints[2], ("GET".into(), "/api/banks/:id".into(), "banks_self".into()));
        assert_eq!(endpoints.len(), 5);
    }

    #[test]
    fn missing_model_or_schema_is_reported() {
        let mut api = Api::new("/api", state());
        let no_model = ModelResource::builder()
            .name("tellers")
            .model("teller")
            .schema(SchemaRef::Named("BankSchema".into()))
            .build()
            .unwrap();
        assert!(matches!(
            api.register(Arc::new(no_model)),
            Err(ConfigError::MissingReference { kind: "model", .. })
        ));

        let no_schema = ModelResource::builder()
            .name("banks")
            .model("bank")
            .schema(SchemaRef::Named("Nope".into()))
            .build()
            .unwrap();
        let no_schema = Arc::new(no_schema);
        assert!(matches!(
            api.register(no_schema.clone()),
            Err(ConfigError::MissingReference { kind: "schema", .. })
        ));
        // failed registration leaves the resource unbound
        assert_eq!(no_schema.route_prefix(), None);
    }

    #[test]
    fn same_method_and_rule_twice_is_rejected() {
        let noop = || handler(|_call: Call| async { Ok::<_, crate::error::AppError>(()) });
        let resource = Resource::builder()
            .name("reports")
            .schema(SchemaRef::Named("BankSchema".into()))
            .route("a", Route::get(noop()).rule("/x").rel("first"))
            .route("b", Route::get(noop()).rule("/x").rel("second"))
            .build()
            .unwrap();
        let mut api = Api::new("/api", state());
        assert!(matches!(
            api.register(Arc::new(resource)),
            Err(ConfigError::DuplicateEndpoint { rule, .. }) if rule == "/api/reports/x"
        ));
    }

    #[test]
    fn prefix_coverage() {
        let shaping = Shaping {
            prefix: "/api".into(),
            debug: false,
        };
        assert!(shaping.covers("/api"));
        assert!(shaping.covers("/api/banks/1"));
        assert!(!shaping.covers("/apiary"));
        assert!(!shaping.covers("/health"));
    }
}
