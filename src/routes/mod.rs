//! Routes: descriptors, route sets, the view pipeline, and common host routes.

mod common;
mod relation;
mod route;
mod view;

pub use common::{api_index, common_routes, cors_layer};
pub use relation::{Relation, RouteSet};
pub use route::{default_verb, handler, BoxFuture, Call, Handler, Pattern, Route};
pub use view::{dispatch, View, BODY_LIMIT};
