//! Route sets: one declaration expanding into several routes.

use crate::error::AppError;
use crate::response::Reply;
use crate::routes::route::{handler, Call, Route};
use crate::schema::SchemaRef;
use axum::http::{Method, StatusCode};

/// Generator of routes for a resource member named `name`.
pub trait RouteSet: Send + Sync {
    fn routes(&self, name: &str) -> Vec<Route>;
}

/// List, add and remove the targets of a to-many association, under `/{attribute}` of an item.
///
/// - `GET /:id/{a}` (`read_{a}`)
/// - `POST /:id/{a}` (`add_{a}`), partial load, commits, 201
/// - `DELETE /:id/{a}/:target_id` (`remove_{a}`), commits, 204
#[derive(Clone, Debug, Default)]
pub struct Relation {
    attribute: Option<String>,
    schema: Option<SchemaRef>,
}

impl Relation {
    pub fn new() -> Self {
        Relation::default()
    }

    /// Association name, when it differs from the member name.
    pub fn attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    /// Schema for the target entities, used to load and dump them.
    pub fn schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl RouteSet for Relation {
    fn routes(&self, name: &str) -> Vec<Route> {
        let attribute = self.attribute.clone().unwrap_or_else(|| name.to_string());
        let rule = format!("/{}", name);

        let attr = attribute.clone();
        let list = Route::get(handler(move |mut call: Call| {
            let attr = attr.clone();
            async move {
                let manager = call.manager()?;
                let item = call.take_item()?;
                manager.relation_instances(call.session(), &item, &attr).await
            }
        }))
        .rule(rule.as_str())
        .item()
        .rel(&format!("read_{}", attribute));

        let attr = attribute.clone();
        let add = Route::post(handler(move |mut call: Call| {
            let attr = attr.clone();
            async move {
                let manager = call.manager()?;
                let item = call.take_item()?;
                let data = call.take_properties();
                let target = manager.relation_add(call.session(), &item, &attr, data).await?;
                manager.commit(call.session()).await?;
                Ok::<_, AppError>(Reply::new(target, StatusCode::CREATED))
            }
        }))
        .rule(rule.as_str())
        .item()
        .partial(true)
        .rel(&format!("add_{}", attribute));

        let attr = attribute.clone();
        let remove = Route::new(
            Method::DELETE,
            handler(move |mut call: Call| {
                let attr = attr.clone();
                async move {
                    let manager = call.manager()?;
                    let item = call.take_item()?;
                    let target_id = call.path_id("target_id")?;
                    manager.relation_remove(call.session(), &item, &attr, target_id).await?;
                    manager.commit(call.session()).await?;
                    Ok::<_, AppError>(((), StatusCode::NO_CONTENT))
                }
            }),
        )
        .rule(format!("{}/:target_id", rule))
        .item()
        .rel(&format!("remove_{}", attribute));

        let (list, add) = match &self.schema {
            Some(schema) => (
                list.response_schema(schema.clone()),
                add.request_schema(schema.clone()).response_schema(schema.clone()),
            ),
            None => (list, add),
        };
        vec![list, add, remove]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_three_item_routes() {
        let routes = Relation::new().routes("accounts");
        let summary: Vec<(Method, String, bool)> = routes
            .iter()
            .map(|r| (r.method.clone(), r.relation(), r.item))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Method::GET, "read_accounts".to_string(), true),
                (Method::POST, "add_accounts".to_string(), true),
                (Method::DELETE, "remove_accounts".to_string(), true),
            ]
        );
        assert!(routes[1].is_partial());
    }

    #[test]
    fn attribute_overrides_member_name_in_relations_only() {
        let routes = Relation::new().attribute("bank_accounts").routes("accounts");
        assert_eq!(routes[0].relation(), "read_bank_accounts");
        assert!(matches!(&routes[2].pattern, Some(crate::routes::Pattern::Literal(p)) if p == "/accounts/:target_id"));
    }
}
