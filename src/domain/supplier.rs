use crate::domain::misc::{entity_schema, timestamp_columns};
use crate::error::ConfigError;
use crate::model::{Column, Model};
use crate::resource::{ModelResource, Resource};
use crate::routes::Relation;
use crate::schema::{Field, Schema, SchemaRef};

pub fn supplier_model() -> Model {
    timestamp_columns(Model::new("supplier"))
        .column(Column::text("_name_1").not_null())
        .column(Column::text("_name_2"))
        .has_many("bank_accounts", "bank_account", "entity_id")
}

/// `rz` is the legal name, `name` the trade name.
pub fn supplier_schema() -> Schema {
    entity_schema("SupplierSchema")
        .field(Field::string("rz").attribute("_name_1").required())
        .field(Field::string("name").attribute("_name_2"))
}

pub fn supplier_resource() -> Result<Resource, ConfigError> {
    ModelResource::builder()
        .name("suppliers")
        .model("supplier")
        .schema(SchemaRef::Named("SupplierSchema".into()))
        .route_set(
            "bank_accounts",
            Relation::new().schema(SchemaRef::Named("BankAccountSchema".into())),
        )
        .build()
}
