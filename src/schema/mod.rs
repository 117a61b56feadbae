//! Serialization schemas: validate/deserialize request payloads into storage records and
//! serialize records back to JSON.
//!
//! A schema is the allow-list of assignable fields for an entity. Loading only ever produces
//! keys named by a loadable field's `attribute`, so handlers never assign arbitrary columns.

mod validation;

pub use validation::Rule;

use crate::error::{AppError, ConfigError};
use crate::model::Record;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference to a nested schema: by registered name (allows forward references) or inline.
#[derive(Clone, Debug)]
pub enum SchemaRef {
    Named(String),
    Inline(Arc<Schema>),
}

#[derive(Clone, Debug)]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    String,
    DateTime,
    Raw,
    Nested { schema: SchemaRef, many: bool },
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    /// Storage key; defaults to `name`.
    pub attribute: Option<String>,
    pub kind: FieldKind,
    pub dump_only: bool,
    pub load_only: bool,
    pub required: bool,
    pub allow_none: bool,
    pub rules: Vec<Rule>,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Field {
            name: name.to_string(),
            attribute: None,
            kind,
            dump_only: false,
            load_only: false,
            required: false,
            allow_none: true,
            rules: Vec::new(),
        }
    }

    pub fn integer(name: &str) -> Self {
        Field::new(name, FieldKind::Integer)
    }

    pub fn float(name: &str) -> Self {
        Field::new(name, FieldKind::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Field::new(name, FieldKind::Boolean)
    }

    pub fn string(name: &str) -> Self {
        Field::new(name, FieldKind::String)
    }

    pub fn datetime(name: &str) -> Self {
        Field::new(name, FieldKind::DateTime)
    }

    pub fn raw(name: &str) -> Self {
        Field::new(name, FieldKind::Raw)
    }

    pub fn nested(name: &str, schema: SchemaRef, many: bool) -> Self {
        Field::new(name, FieldKind::Nested { schema, many })
    }

    pub fn attribute(mut self, attribute: &str) -> Self {
        self.attribute = Some(attribute.to_string());
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    /// Required on full loads; also disallows null.
    pub fn required(mut self) -> Self {
        self.required = true;
        self.allow_none = false;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn key(&self) -> &str {
        self.attribute.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: &str) -> Self {
        Schema {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a field, replacing any field of the same name.
    pub fn field(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Copy all fields of `base` not already declared here (schema mixins).
    pub fn extend(mut self, base: &Schema) -> Self {
        for f in &base.fields {
            if self.get(&f.name).is_none() {
                self.fields.push(f.clone());
            }
        }
        self
    }

    /// Restrict to the named fields, in the given order.
    pub fn only(&self, name: &str, names: &[&str]) -> Schema {
        Schema {
            name: name.to_string(),
            fields: names
                .iter()
                .filter_map(|n| self.get(n).cloned())
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Storage key behind the field `name`.
    pub fn attribute_of(&self, name: &str) -> Option<&str> {
        self.get(name).map(Field::key)
    }

    /// Validate `payload` and convert it into a storage record keyed by field attribute.
    /// `partial` skips required checks for absent fields (PATCH semantics).
    pub fn load(&self, payload: &Value, partial: bool, registry: &SchemaRegistry) -> Result<Record, AppError> {
        self.load_inner(payload, partial, registry)
            .map_err(AppError::Validation)
    }

    fn load_inner(&self, payload: &Value, partial: bool, registry: &SchemaRegistry) -> Result<Record, Map<String, Value>> {
        let mut errors = Map::new();
        let input = match payload {
            Value::Object(map) => map,
            _ => {
                errors.insert("_schema".into(), Value::from(vec!["Invalid input type."]));
                return Err(errors);
            }
        };

        let mut out = Record::new();
        for field in self.fields.iter().filter(|f| !f.dump_only) {
            let value = match input.get(&field.name) {
                None => {
                    if field.required && !partial {
                        errors.insert(field.name.clone(), Value::from(vec!["Missing data for required field."]));
                    }
                    continue;
                }
                Some(Value::Null) => {
                    if !field.allow_none {
                        errors.insert(field.name.clone(), Value::from(vec!["Field may not be null."]));
                    } else {
                        out.insert(field.key().to_string(), Value::Null);
                    }
                    continue;
                }
                Some(v) => v,
            };

            match convert(field, value, partial, registry) {
                Ok(converted) => {
                    let failures: Vec<String> = field
                        .rules
                        .iter()
                        .filter_map(|r| r.check(&converted).err())
                        .collect();
                    if failures.is_empty() {
                        out.insert(field.key().to_string(), converted);
                    } else {
                        errors.insert(field.name.clone(), Value::from(failures));
                    }
                }
                Err(messages) => {
                    errors.insert(field.name.clone(), messages);
                }
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }

    /// Serialize one record. `only` (if non-empty) projects the output to those field names.
    pub fn dump(&self, record: &Record, only: &[String], registry: &SchemaRegistry) -> Value {
        let mut out = Map::new();
        for field in self.fields.iter().filter(|f| !f.load_only) {
            if !only.is_empty() && !only.iter().any(|n| n == &field.name) {
                continue;
            }
            let Some(value) = record.get(field.key()) else {
                continue;
            };
            let dumped = match (&field.kind, value) {
                (FieldKind::Nested { schema, .. }, v) if !v.is_null() => match registry.resolve(schema) {
                    Some(nested) => nested.dump_value(v, registry),
                    None => continue,
                },
                _ => value.clone(),
            };
            out.insert(field.name.clone(), dumped);
        }
        Value::Object(out)
    }

    pub fn dump_many(&self, records: &[Record], only: &[String], registry: &SchemaRegistry) -> Value {
        Value::Array(records.iter().map(|r| self.dump(r, only, registry)).collect())
    }

    fn dump_value(&self, value: &Value, registry: &SchemaRegistry) -> Value {
        match value {
            Value::Object(map) => self.dump(map, &[], registry),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.dump_value(v, registry)).collect()),
            other => other.clone(),
        }
    }
}

fn invalid(message: &str) -> Value {
    Value::from(vec![message])
}

fn convert(field: &Field, value: &Value, partial: bool, registry: &SchemaRegistry) -> Result<Value, Value> {
    match &field.kind {
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
                _ => Err(invalid("Not a valid integer.")),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid("Not a valid integer.")),
            _ => Err(invalid("Not a valid integer.")),
        },
        FieldKind::Float => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            n.and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("Not a valid number."))
        }
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(invalid("Not a valid boolean.")),
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(Value::Bool(true)),
                Some(0) => Ok(Value::Bool(false)),
                _ => Err(invalid("Not a valid boolean.")),
            },
            _ => Err(invalid("Not a valid boolean.")),
        },
        FieldKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(invalid("Not a valid string.")),
        },
        FieldKind::DateTime => value
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| Value::String(dt.to_rfc3339()))
            .ok_or_else(|| invalid("Not a valid datetime.")),
        FieldKind::Raw => Ok(value.clone()),
        FieldKind::Nested { schema, many } => {
            let nested = registry
                .resolve(schema)
                .ok_or_else(|| invalid("Nested schema is not registered."))?;
            if *many {
                let Value::Array(items) = value else {
                    return Err(invalid("Invalid type."));
                };
                let mut loaded = Vec::with_capacity(items.len());
                let mut errors = Map::new();
                for (i, item) in items.iter().enumerate() {
                    match nested.load_inner(item, partial, registry) {
                        Ok(r) => loaded.push(Value::Object(r)),
                        Err(e) => {
                            errors.insert(i.to_string(), Value::Object(e));
                        }
                    }
                }
                if errors.is_empty() {
                    Ok(Value::Array(loaded))
                } else {
                    Err(Value::Object(errors))
                }
            } else {
                nested
                    .load_inner(value, partial, registry)
                    .map(Value::Object)
                    .map_err(Value::Object)
            }
        }
    }
}

/// Named schemas, used to resolve `SchemaRef::Named` nested references.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry and check every named nested reference resolves.
    pub fn from_schemas(schemas: Vec<Arc<Schema>>) -> Result<Self, ConfigError> {
        let registry = SchemaRegistry {
            schemas: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
        };
        for schema in registry.schemas.values() {
            for field in &schema.fields {
                if let FieldKind::Nested { schema: SchemaRef::Named(name), .. } = &field.kind {
                    if !registry.schemas.contains_key(name) {
                        return Err(ConfigError::MissingReference {
                            kind: "schema",
                            id: name.clone(),
                        });
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    pub fn resolve(&self, schema: &SchemaRef) -> Option<Arc<Schema>> {
        match schema {
            SchemaRef::Named(name) => self.schemas.get(name).cloned(),
            SchemaRef::Inline(s) => Some(Arc::clone(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account_schema() -> Schema {
        Schema::new("AccountSchema")
            .field(Field::integer("id").dump_only())
            .field(Field::string("number").required())
            .field(Field::string("owner"))
    }

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_schemas(vec![Arc::new(account_schema())]).unwrap()
    }

    #[test]
    fn load_maps_attributes_and_skips_dump_only() {
        let schema = Schema::new("SupplierSchema")
            .field(Field::integer("id").dump_only())
            .field(Field::string("rz").attribute("_name_1"));
        let loaded = schema
            .load(&json!({"id": 9, "rz": "ACME", "unknown": 1}), false, &registry())
            .unwrap();
        assert_eq!(Value::Object(loaded), json!({"_name_1": "ACME"}));
    }

    #[test]
    fn attribute_of_follows_field_mapping() {
        let schema = Schema::new("SupplierSchema")
            .field(Field::integer("id"))
            .field(Field::string("rz").attribute("_name_1"));
        assert_eq!(schema.attribute_of("rz"), Some("_name_1"));
        assert_eq!(schema.attribute_of("id"), Some("id"));
        assert_eq!(schema.attribute_of("_name_1"), None);
    }

    #[test]
    fn load_reports_per_field_messages() {
        let err = account_schema()
            .load(&json!({"owner": 3}), false, &registry())
            .unwrap_err();
        let AppError::Validation(messages) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(messages["number"], json!(["Missing data for required field."]));
        assert_eq!(messages["owner"], json!(["Not a valid string."]));
    }

    #[test]
    fn partial_load_ignores_missing_required() {
        let loaded = account_schema()
            .load(&json!({"owner": "Ana"}), true, &registry())
            .unwrap();
        assert_eq!(Value::Object(loaded), json!({"owner": "Ana"}));
    }

    #[test]
    fn integers_accept_numeric_strings() {
        let schema = Schema::new("S").field(Field::integer("n"));
        let loaded = schema.load(&json!({"n": "42"}), false, &registry()).unwrap();
        assert_eq!(loaded["n"], json!(42));
        assert!(schema.load(&json!({"n": "4x"}), false, &registry()).is_err());
    }

    #[test]
    fn nested_by_name_loads_and_dumps() {
        let schema = Schema::new("BankSchema")
            .field(Field::string("name"))
            .field(Field::nested("accounts", SchemaRef::Named("AccountSchema".into()), true));
        let reg = registry();

        let err = schema
            .load(&json!({"accounts": [{"owner": "x"}]}), false, &reg)
            .unwrap_err();
        let AppError::Validation(messages) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(messages["accounts"]["0"]["number"], json!(["Missing data for required field."]));

        let record = json!({"name": "B", "accounts": [{"id": 1, "number": "7", "secret": "s"}]});
        let Value::Object(record) = record else { unreachable!() };
        assert_eq!(
            schema.dump(&record, &[], &reg),
            json!({"name": "B", "accounts": [{"id": 1, "number": "7"}]})
        );
    }

    #[test]
    fn dump_projects_fields_and_hides_load_only() {
        let schema = Schema::new("UserSchema")
            .field(Field::integer("id"))
            .field(Field::string("name"))
            .field(Field::string("password").load_only());
        let Value::Object(record) = json!({"id": 1, "name": "Ana", "password": "x"}) else {
            unreachable!()
        };
        assert_eq!(schema.dump(&record, &[], &registry()), json!({"id": 1, "name": "Ana"}));
        assert_eq!(schema.dump(&record, &["name".to_string()], &registry()), json!({"name": "Ana"}));
    }

    #[test]
    fn unresolved_named_schema_is_a_config_error() {
        let schema = Schema::new("A").field(Field::nested("b", SchemaRef::Named("B".into()), false));
        let err = SchemaRegistry::from_schemas(vec![Arc::new(schema)]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingReference { kind: "schema", .. }));
    }
}
