//! Shared schema pieces: id, timestamps and the common entity shape.

use crate::model::{Column, Model};
use crate::schema::{Field, Schema, SchemaRef};

pub fn id_schema(name: &str) -> Schema {
    Schema::new(name).field(Field::integer("id").dump_only())
}

/// `created`/`modified`, filled by storage.
pub fn timestamp_mixin(schema: Schema) -> Schema {
    schema
        .field(Field::datetime("created").dump_only())
        .field(Field::datetime("modified").dump_only())
}

pub fn timestamp_columns(model: Model) -> Model {
    model
        .column(Column::timestamp("created").not_null().with_default())
        .column(Column::timestamp("modified").not_null().with_default())
}

/// Base of every party schema (suppliers and the like).
pub fn entity_schema(name: &str) -> Schema {
    timestamp_mixin(id_schema(name)).field(
        Field::nested("bank_accounts", SchemaRef::Named("BankAccountSchema".into()), true).dump_only(),
    )
}
