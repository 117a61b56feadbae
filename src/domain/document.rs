use crate::domain::misc::{id_schema, timestamp_columns, timestamp_mixin};
use crate::error::ConfigError;
use crate::model::Model;
use crate::resource::{ModelResource, Resource};
use crate::schema::{Schema, SchemaRef};

pub fn document_model() -> Model {
    timestamp_columns(Model::new("document"))
}

pub fn document_schema() -> Schema {
    timestamp_mixin(id_schema("DocumentSchema"))
}

pub fn document_resource() -> Result<Resource, ConfigError> {
    ModelResource::builder()
        .name("documents")
        .model("document")
        .schema(SchemaRef::Named("DocumentSchema".into()))
        .build()
}
