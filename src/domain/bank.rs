//! Banks and their accounts.

use crate::domain::validators::{validate_cbu, validate_cuit};
use crate::error::ConfigError;
use crate::model::{Column, Model};
use crate::resource::{ModelResource, Resource};
use crate::routes::Relation;
use crate::schema::{Field, Rule, Schema, SchemaRef};

pub fn bank_model() -> Model {
    Model::new("bank")
        .column(Column::text("name").not_null().unique())
        .column(Column::text("bcra_code").unique())
        .column(Column::text("cuit").unique())
        .has_many("accounts", "bank_account", "bank_id")
}

pub fn bank_account_model() -> Model {
    Model::new("bank_account")
        .column(Column::text("branch"))
        .column(Column::text("acc_type"))
        .column(Column::text("number"))
        .column(Column::text("owner"))
        .column(Column::text("cbu"))
        .column(Column::integer("bank_id").not_null())
        .column(Column::integer("entity_id"))
        .belongs_to("bank", "bank", "bank_id")
        .belongs_to("entity", "supplier", "entity_id")
}

pub fn bank_schema() -> Schema {
    Schema::new("BankSchema")
        .field(Field::integer("id").dump_only())
        .field(Field::string("name").required())
        .field(Field::string("bcra_code").rule(Rule::max_length(8)))
        .field(Field::string("cuit").rule(Rule::Check {
            check: validate_cuit,
            message: "CUIT Invalid",
        }))
}

pub fn bank_account_schema() -> Schema {
    Schema::new("BankAccountSchema")
        .field(Field::integer("id").dump_only())
        .field(Field::string("branch"))
        .field(Field::string("acc_type"))
        .field(Field::string("number"))
        .field(Field::string("owner"))
        .field(Field::string("cbu").rule(Rule::Check {
            check: validate_cbu,
            message: "CBU invalid",
        }))
        .field(Field::integer("bank_id"))
        .field(Field::integer("entity_id"))
}

/// `/banks`, with `/banks/:id/accounts`.
pub fn bank_resource() -> Result<Resource, ConfigError> {
    ModelResource::builder()
        .name("banks")
        .model("bank")
        .schema(SchemaRef::Named("BankSchema".into()))
        .route_set(
            "accounts",
            Relation::new().schema(SchemaRef::Named("BankAccountSchema".into())),
        )
        .build()
}

pub fn bank_account_resource() -> Result<Resource, ConfigError> {
    ModelResource::builder()
        .name("bank_accounts")
        .model("bank_account")
        .schema(SchemaRef::Named("BankAccountSchema".into()))
        .build()
}
