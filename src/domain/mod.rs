//! The Nobix business objects served by the api: banks, bank accounts, suppliers, documents.

mod bank;
mod document;
mod misc;
mod supplier;
pub mod validators;

pub use bank::{bank_account_resource, bank_resource};
pub use document::document_resource;
pub use supplier::supplier_resource;

use crate::api::Api;
use crate::error::ConfigError;
use crate::model::ModelRegistry;
use crate::resource::Resource;
use crate::schema::SchemaRegistry;
use crate::state::AppState;
use std::sync::Arc;

pub fn models() -> Result<ModelRegistry, ConfigError> {
    ModelRegistry::from_models(vec![
        bank::bank_model(),
        bank::bank_account_model(),
        supplier::supplier_model(),
        document::document_model(),
    ])
}

pub fn schemas() -> Result<SchemaRegistry, ConfigError> {
    SchemaRegistry::from_schemas(
        [
            bank::bank_schema(),
            bank::bank_account_schema(),
            supplier::supplier_schema(),
            document::document_schema(),
        ]
        .into_iter()
        .map(Arc::new)
        .collect(),
    )
}

pub fn resources() -> Result<Vec<Arc<Resource>>, ConfigError> {
    Ok(vec![
        Arc::new(bank_resource()?),
        Arc::new(bank_account_resource()?),
        Arc::new(supplier_resource()?),
        Arc::new(document_resource()?),
    ])
}

/// An api under `prefix` with every domain resource registered.
pub fn api(prefix: &str, state: AppState) -> Result<Api, ConfigError> {
    let mut api = Api::new(prefix, state);
    for resource in resources()? {
        api.register(resource)?;
    }
    Ok(api)
}
