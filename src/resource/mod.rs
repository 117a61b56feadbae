//! Resources: named, immutable bundles of routes bound to a model and a schema.
//!
//! Routes are assembled by an explicit builder: inherited routes first, then the
//! resource's own routes, then route sets expanded last. Every route is keyed by its
//! relation name; a later route with the same name replaces the earlier one in place.

mod model_resource;

pub use model_resource::{ModelResource, X_TOTAL_COUNT};

use crate::error::ConfigError;
use crate::routes::{Route, RouteSet};
use crate::schema::SchemaRef;
use crate::service::Manager;
use std::sync::{Arc, OnceLock};

#[derive(Clone, Debug)]
pub struct ResourceMeta {
    pub name: String,
    /// Table name of the backing model, for entity-backed resources.
    pub model: Option<String>,
    pub schema: SchemaRef,
    /// Column used for item lookups; defaults to the model's primary key.
    pub id_attribute: Option<String>,
}

#[derive(Debug)]
struct Binding {
    api: u64,
    route_prefix: String,
}

pub struct Resource {
    meta: ResourceMeta,
    routes: Vec<(String, Route)>,
    manager: OnceLock<Arc<Manager>>,
    binding: OnceLock<Binding>,
}

impl Resource {
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::default()
    }

    pub fn meta(&self) -> &ResourceMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Routes in assembly order, with their relation names.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &Route)> {
        self.routes.iter().map(|(rel, route)| (rel.as_str(), route))
    }

    pub fn route(&self, relation: &str) -> Option<&Route> {
        self.routes.iter().find(|(rel, _)| rel == relation).map(|(_, r)| r)
    }

    /// Set once the resource is registered, for model-backed resources.
    pub fn manager(&self) -> Option<&Arc<Manager>> {
        self.manager.get()
    }

    /// `api prefix + "/" + name`, once registered.
    pub fn route_prefix(&self) -> Option<&str> {
        self.binding.get().map(|b| b.route_prefix.as_str())
    }

    /// Concrete URL of an item route, e.g. the `Location` of a created entity.
    pub fn url_for(&self, relation: &str, id: i64) -> Option<String> {
        let route = self.route(relation)?;
        let rule = route.build_rule(&self.meta, self.route_prefix()?).ok()?;
        let id = id.to_string();
        Some(
            rule.split('/')
                .map(|seg| if seg == ":id" { id.as_str() } else { seg })
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    pub(crate) fn bound_api(&self) -> Option<u64> {
        self.binding.get().map(|b| b.api)
    }

    pub(crate) fn bind(&self, api: u64, route_prefix: String, manager: Option<Arc<Manager>>) -> Result<(), ConfigError> {
        if let Some(manager) = manager {
            // an already attached manager is kept
            let _ = self.manager.set(manager);
        }
        self.binding
            .set(Binding { api, route_prefix })
            .map_err(|_| ConfigError::AlreadyBound(self.meta.name.clone()))
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("meta", &self.meta)
            .field("routes", &self.routes.iter().map(|(rel, _)| rel).collect::<Vec<_>>())
            .field("binding", &self.binding.get())
            .finish()
    }
}

/// Explicit replacement for class-body scanning: base routes, own routes, route sets.
#[derive(Default)]
pub struct ResourceBuilder {
    name: Option<String>,
    model: Option<String>,
    schema: Option<SchemaRef>,
    id_attribute: Option<String>,
    routes: Vec<(String, Route)>,
    sets: Vec<(String, Box<dyn RouteSet>)>,
}

/// Attribute defaults to the member name; keyed by relation, replacing in place.
fn add_route(routes: &mut Vec<(String, Route)>, name: &str, mut route: Route) {
    if route.attribute.is_none() {
        route.attribute = Some(name.to_string());
    }
    let relation = route.relation();
    match routes.iter_mut().find(|(rel, _)| *rel == relation) {
        Some(slot) => slot.1 = route,
        None => routes.push((relation, route)),
    }
}

impl ResourceBuilder {
    /// Defaults to the lower-cased model table name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn id_attribute(mut self, column: &str) -> Self {
        self.id_attribute = Some(column.to_string());
        self
    }

    /// Base routes given as `(member name, route)`.
    pub fn inherit<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = (S, Route)>,
        S: AsRef<str>,
    {
        for (name, route) in routes {
            add_route(&mut self.routes, name.as_ref(), route);
        }
        self
    }

    /// Inherit another resource: its routes, and its model, schema and id attribute
    /// where not set here. The name is never inherited.
    pub fn extends(mut self, base: &Resource) -> Self {
        for (_, route) in base.routes() {
            let name = route.attribute.clone().unwrap_or_default();
            add_route(&mut self.routes, &name, route.clone());
        }
        self.model = self.model.or_else(|| base.meta.model.clone());
        self.schema = self.schema.or_else(|| Some(base.meta.schema.clone()));
        self.id_attribute = self.id_attribute.or_else(|| base.meta.id_attribute.clone());
        self
    }

    pub fn route(mut self, name: &str, route: Route) -> Self {
        add_route(&mut self.routes, name, route);
        self
    }

    /// Expanded after all plain routes, whatever the call order.
    pub fn route_set(mut self, name: &str, set: impl RouteSet + 'static) -> Self {
        self.sets.push((name.to_string(), Box::new(set)));
        self
    }

    pub fn build(self) -> Result<Resource, ConfigError> {
        let name = match (self.name, &self.model) {
            (Some(name), _) => name,
            (None, Some(model)) => model.to_lowercase(),
            (None, None) => return Err(ConfigError::MissingName(String::new())),
        };
        let schema = self.schema.ok_or_else(|| ConfigError::MissingSchema(name.clone()))?;
        let meta = ResourceMeta {
            name,
            model: self.model,
            schema,
            id_attribute: self.id_attribute,
        };

        let mut routes = self.routes;
        for (set_name, set) in &self.sets {
            for (i, mut route) in set.routes(set_name).into_iter().enumerate() {
                if route.attribute.is_none() {
                    route.attribute = Some(format!("{}_{}", set_name, i));
                }
                add_route(&mut routes, set_name, route);
            }
        }
        for (_, route) in &routes {
            route.build_rule(&meta, "")?;
        }

        Ok(Resource {
            meta,
            routes,
            manager: OnceLock::new(),
            binding: OnceLock::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::routes::{handler, Call, Relation};
    use axum::http::Method;

    fn noop() -> crate::routes::Handler {
        handler(|_call: Call| async { Ok::<_, AppError>(()) })
    }

    fn schema() -> SchemaRef {
        SchemaRef::Named("BankSchema".into())
    }

    #[test]
    fn name_defaults_to_model() {
        let r = Resource::builder().model("Bank").schema(schema()).build().unwrap();
        assert_eq!(r.name(), "bank");
        assert!(matches!(
            Resource::builder().schema(schema()).build(),
            Err(ConfigError::MissingName(_))
        ));
        assert!(matches!(
            Resource::builder().name("banks").build(),
            Err(ConfigError::MissingSchema(n)) if n == "banks"
        ));
    }

    #[test]
    fn own_route_overrides_inherited_in_place() {
        let base = ModelResource::builder().name("base").schema(schema()).build().unwrap();
        let custom = Route::get(noop()).rule("").rel("instances").response_schema(schema());
        let r = Resource::builder()
            .name("banks")
            .extends(&base)
            .route("instances", custom)
            .build()
            .unwrap();
        let relations: Vec<&str> = r.routes().map(|(rel, _)| rel).collect();
        assert_eq!(relations, vec!["instances", "create", "self", "update", "destroy"]);
        assert!(r.route("instances").unwrap().response_schema.is_some());
        assert!(matches!(&r.meta().schema, SchemaRef::Named(n) if n == "BankSchema"));
    }

    #[test]
    fn route_sets_expand_last_and_win() {
        let clash = Route::get(noop()).rule("/accounts").item().rel("read_accounts");
        let r = ModelResource::builder()
            .name("banks")
            .schema(schema())
            .route_set("accounts", Relation::new())
            .route("accounts_view", clash)
            .build()
            .unwrap();
        let relations: Vec<&str> = r.routes().map(|(rel, _)| rel).collect();
        assert_eq!(
            relations,
            vec![
                "instances",
                "create",
                "self",
                "update",
                "destroy",
                "read_accounts",
                "add_accounts",
                "remove_accounts"
            ]
        );
        // the relation's GET replaced the plain route
        assert_eq!(r.route("read_accounts").unwrap().attribute.as_deref(), Some("accounts_0"));
        let uniq: std::collections::HashSet<&str> = relations.iter().copied().collect();
        assert_eq!(uniq.len(), relations.len());
    }

    #[test]
    fn derived_relation_names() {
        let r = Resource::builder()
            .name("reports")
            .schema(schema())
            .route("summary", Route::get(noop()))
            .route("summary", Route::new(Method::PUT, noop()))
            .build()
            .unwrap();
        let relations: Vec<&str> = r.routes().map(|(rel, _)| rel).collect();
        assert_eq!(relations, vec!["read_summary", "create_summary"]);
    }

    #[test]
    fn unbound_resource_has_no_urls() {
        let r = ModelResource::builder().name("banks").schema(schema()).build().unwrap();
        assert_eq!(r.route_prefix(), None);
        assert_eq!(r.url_for("self", 1), None);
        r.bind(1, "/api/banks".into(), None).unwrap();
        assert_eq!(r.url_for("self", 7).as_deref(), Some("/api/banks/7"));
        assert!(matches!(r.bind(2, "/x/banks".into(), None), Err(ConfigError::AlreadyBound(_))));
    }
}
