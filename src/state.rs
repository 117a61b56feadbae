//! Shared application state handed to every view. Built once at startup, read-only afterwards.

use crate::model::ModelRegistry;
use crate::schema::SchemaRegistry;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub models: Arc<ModelRegistry>,
    pub schemas: Arc<SchemaRegistry>,
    /// Pretty JSON and conflict diagnostics.
    pub debug: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, models: Arc<ModelRegistry>, schemas: Arc<SchemaRegistry>, debug: bool) -> Self {
        AppState {
            store,
            models,
            schemas,
            debug,
        }
    }
}
