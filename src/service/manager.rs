//! Generic CRUD and relation operations for one resource's model.
//!
//! The manager is the only component that talks to storage. It translates querystring
//! filters into backend conditions, allow-lists assignments against the model's columns,
//! and turns integrity violations into `BackendConflict` after rolling the session back.

use crate::error::{AppError, ConfigError, ConflictInfo, Lookup};
use crate::model::{AssociationKind, ColumnKind, Model, ModelRegistry, Record};
use crate::query::{Arity, Direction, Filter, Operator, QueryParams, Sort};
use crate::store::{Condition, Operand, Order, Select, Session, StoreError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Whether a write commits immediately or leaves the transaction open for the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    Now,
    Deferred,
}

#[derive(Debug)]
pub struct Manager {
    resource: String,
    model: Arc<Model>,
    models: Arc<ModelRegistry>,
    id_column: String,
    id_kind: ColumnKind,
    debug: bool,
}

impl Manager {
    /// `id_attribute` defaults to the model's primary key.
    pub fn new(
        resource: &str,
        model: Arc<Model>,
        models: Arc<ModelRegistry>,
        id_attribute: Option<&str>,
        debug: bool,
    ) -> Result<Self, ConfigError> {
        let id_column = id_attribute.unwrap_or(&model.primary_key).to_string();
        let id_kind = model
            .get_column(&id_column)
            .map(|c| c.kind)
            .ok_or_else(|| ConfigError::InvalidPrimaryKey {
                table: model.name.clone(),
                column: id_column.clone(),
            })?;
        Ok(Manager {
            resource: resource.to_string(),
            model,
            models,
            id_column,
            id_kind,
            debug,
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Id of a stored item, as used in URLs.
    pub fn id_of(&self, item: &Record) -> Option<i64> {
        item.get(&self.id_column).and_then(Value::as_i64)
    }

    /// Filtered, sorted entities. An empty `filters` list means no filtering.
    pub async fn instances(
        &self,
        session: &mut dyn Session,
        filters: &[Filter],
        sort: &[Sort],
    ) -> Result<Vec<Record>, AppError> {
        let select = Select {
            conditions: self.conditions(filters)?,
            order: self.order(sort),
            ..Select::default()
        };
        Ok(session.select(&self.model, &select).await?)
    }

    /// One page of `instances` plus the unpaginated match count.
    pub async fn paginate(
        &self,
        session: &mut dyn Session,
        params: &QueryParams,
    ) -> Result<(Vec<Record>, u64), AppError> {
        let conditions = self.conditions(&params.filters)?;
        let total = session.count(&self.model, &conditions).await?;
        let (limit, offset) = match params.per_page {
            Some(per_page) => {
                let page = params.page.unwrap_or(1).max(1);
                let offset = (page - 1)
                    .checked_mul(per_page)
                    .filter(|n| i64::try_from(*n).is_ok())
                    .ok_or_else(|| AppError::InvalidQuery(format!("page {} is out of range", page)))?;
                (Some(per_page), Some(offset))
            }
            None => (None, None),
        };
        let select = Select {
            conditions,
            order: self.order(&params.sort),
            limit,
            offset,
        };
        let rows = session.select(&self.model, &select).await?;
        Ok((rows, total))
    }

    /// First match; no match is `ItemNotFound`, unlike `instances`.
    pub async fn first(
        &self,
        session: &mut dyn Session,
        filters: &[Filter],
        sort: &[Sort],
    ) -> Result<Record, AppError> {
        let select = Select {
            conditions: self.conditions(filters)?,
            order: self.order(sort),
            limit: Some(1),
            offset: None,
        };
        session
            .select(&self.model, &select)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ItemNotFound {
                resource: self.resource.clone(),
                lookup: Lookup::Where(filters.to_vec()),
            })
    }

    pub async fn read(&self, session: &mut dyn Session, id: i64) -> Result<Record, AppError> {
        let select = Select {
            conditions: vec![Condition::eq(&self.id_column, self.id_kind, Value::from(id))],
            limit: Some(1),
            ..Select::default()
        };
        session
            .select(&self.model, &select)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::item_not_found(&self.resource, id))
    }

    pub async fn create(&self, session: &mut dyn Session, properties: Record, commit: Commit) -> Result<Record, AppError> {
        let values = assignable(&self.model, properties)?;
        let item = match session.insert(&self.model, &values).await {
            Ok(item) => item,
            Err(e) => return Err(self.fail(session, e, true).await),
        };
        if commit == Commit::Now {
            if let Err(e) = session.commit().await {
                return Err(self.fail(session, e, true).await);
            }
        }
        tracing::debug!(resource = %self.resource, id = ?item.get(&self.id_column), "created");
        Ok(item)
    }

    /// Apply only the assignments that change the item. No changes means no write.
    pub async fn update(
        &self,
        session: &mut dyn Session,
        item: &Record,
        changes: Record,
        commit: Commit,
    ) -> Result<Record, AppError> {
        let changes = assignable(&self.model, changes)?;
        let actual: Record = changes
            .into_iter()
            .filter(|(k, v)| is_change(item.get(k).unwrap_or(&Value::Null), v))
            .collect();
        if actual.is_empty() {
            return Ok(item.clone());
        }
        let id = self.pk_of(item);
        let updated = match session.update(&self.model, &id, &actual).await {
            Ok(updated) => updated,
            Err(e) => return Err(self.fail(session, e, true).await),
        };
        if commit == Commit::Now {
            if let Err(e) = session.commit().await {
                return Err(self.fail(session, e, true).await);
            }
        }
        updated.ok_or_else(|| self.not_found(item))
    }

    /// Delete and commit. Conflicts carry no diagnostics here.
    pub async fn delete(&self, session: &mut dyn Session, item: &Record) -> Result<(), AppError> {
        let pk = self.pk_condition(item);
        let result = match session.delete(&self.model, &[pk]).await {
            Ok(_) => session.commit().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(session, e, false).await),
        }
    }

    /// Entities behind the named association of `item`.
    pub async fn relation_instances(
        &self,
        session: &mut dyn Session,
        item: &Record,
        attribute: &str,
    ) -> Result<Vec<Record>, AppError> {
        let (kind, target) = self.association(attribute)?;
        let condition = match &kind {
            AssociationKind::ToMany { remote_column } => {
                let kind = column_kind(&target, remote_column);
                Condition::eq(remote_column, kind, self.pk_of(item))
            }
            AssociationKind::ToOne { local_column } => {
                let fk = item.get(local_column).cloned().unwrap_or(Value::Null);
                if fk.is_null() {
                    return Ok(Vec::new());
                }
                Condition::eq(&target.primary_key, column_kind(&target, &target.primary_key), fk)
            }
        };
        let select = Select {
            conditions: vec![condition],
            order: vec![Order {
                column: target.primary_key.clone(),
                direction: Direction::Asc,
            }],
            ..Select::default()
        };
        Ok(session.select(&target, &select).await?)
    }

    /// Create a target entity attached to `item` through a to-many association. The caller commits.
    pub async fn relation_add(
        &self,
        session: &mut dyn Session,
        item: &Record,
        attribute: &str,
        data: Record,
    ) -> Result<Record, AppError> {
        let (kind, target) = self.association(attribute)?;
        let AssociationKind::ToMany { remote_column } = kind else {
            return Err(AppError::NotFound);
        };
        let mut values = assignable(&target, data)?;
        values.insert(remote_column, self.pk_of(item));
        match session.insert(&target, &values).await {
            Ok(row) => Ok(row),
            Err(e) => Err(self.fail(session, e, true).await),
        }
    }

    /// Delete the target `target_id` if it belongs to `item`'s association. The caller commits.
    pub async fn relation_remove(
        &self,
        session: &mut dyn Session,
        item: &Record,
        attribute: &str,
        target_id: i64,
    ) -> Result<(), AppError> {
        let (kind, target) = self.association(attribute)?;
        let AssociationKind::ToMany { remote_column } = kind else {
            return Err(AppError::NotFound);
        };
        let conditions = [
            Condition::eq(&remote_column, column_kind(&target, &remote_column), self.pk_of(item)),
            Condition::eq(
                &target.primary_key,
                column_kind(&target, &target.primary_key),
                Value::from(target_id),
            ),
        ];
        let deleted = match session.delete(&target, &conditions).await {
            Ok(n) => n,
            Err(e) => return Err(self.fail(session, e, false).await),
        };
        if deleted == 0 {
            return Err(AppError::item_not_found(&target.name, target_id));
        }
        Ok(())
    }

    pub async fn commit(&self, session: &mut dyn Session) -> Result<(), AppError> {
        match session.commit().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(session, e, true).await),
        }
    }

    /// Roll back, then map the storage error. Integrity violations become conflicts.
    async fn fail(&self, session: &mut dyn Session, e: StoreError, expose: bool) -> AppError {
        if let Err(rollback) = session.rollback().await {
            tracing::error!(resource = %self.resource, error = %rollback, "rollback failed");
        }
        match e {
            StoreError::Integrity {
                message,
                statement,
                params,
            } => {
                tracing::warn!(resource = %self.resource, %message, "integrity violation, rolled back");
                let debug_info = (self.debug && expose).then(|| ConflictInfo {
                    exception_message: message,
                    statement,
                    params,
                });
                AppError::BackendConflict { debug_info }
            }
            other => AppError::Store(other),
        }
    }

    fn not_found(&self, item: &Record) -> AppError {
        match self.id_of(item) {
            Some(id) => AppError::item_not_found(&self.resource, id),
            None => AppError::NotFound,
        }
    }

    fn pk_of(&self, item: &Record) -> Value {
        item.get(&self.model.primary_key).cloned().unwrap_or(Value::Null)
    }

    fn pk_condition(&self, item: &Record) -> Condition {
        let kind = column_kind(&self.model, &self.model.primary_key);
        Condition::eq(&self.model.primary_key, kind, self.pk_of(item))
    }

    fn association(&self, attribute: &str) -> Result<(AssociationKind, Arc<Model>), AppError> {
        let assoc = self.model.association(attribute).ok_or(AppError::NotFound)?;
        let target = self.models.get(&assoc.target).cloned().ok_or(AppError::NotFound)?;
        Ok((assoc.kind.clone(), target))
    }

    /// Sort directives on known columns; unknown fields are skipped. Defaults to ascending id.
    fn order(&self, sort: &[Sort]) -> Vec<Order> {
        let order: Vec<Order> = sort
            .iter()
            .filter(|s| self.model.get_column(&s.field).is_some())
            .map(|s| Order {
                column: s.field.clone(),
                direction: s.direction,
            })
            .collect();
        if order.is_empty() {
            vec![Order {
                column: self.id_column.clone(),
                direction: Direction::Asc,
            }]
        } else {
            order
        }
    }

    fn conditions(&self, filters: &[Filter]) -> Result<Vec<Condition>, AppError> {
        filters.iter().map(|f| self.condition(f)).collect()
    }

    /// Translate one filter. Operators are checked before fields.
    fn condition(&self, filter: &Filter) -> Result<Condition, AppError> {
        let op = filter.operator()?;
        let argument = filter.argument.as_deref().unwrap_or("");
        if op.arity() == Arity::Relationship {
            return self.related_condition(filter, op, argument);
        }
        let column = self
            .model
            .get_column(&filter.name)
            .ok_or_else(|| AppError::InvalidQuery(format!("unknown field '{}'", filter.name)))?;
        let operand = match op.arity() {
            Arity::Nullary => Operand::None,
            _ if op.is_textual() => Operand::One(Value::String(argument.to_string())),
            _ if matches!(op, Operator::In | Operator::NotIn) => Operand::Many(
                argument
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| coerce(&filter.name, column.kind, s))
                    .collect::<Result<_, _>>()?,
            ),
            _ => Operand::One(coerce(&filter.name, column.kind, argument)?),
        };
        Ok(Condition::compare(&column.name, column.kind, op, operand))
    }

    fn related_condition(&self, filter: &Filter, op: Operator, argument: &str) -> Result<Condition, AppError> {
        let assoc = self
            .model
            .association(&filter.name)
            .ok_or_else(|| AppError::InvalidQuery(format!("unknown relation '{}'", filter.name)))?;
        let target = self
            .models
            .get(&assoc.target)
            .cloned()
            .ok_or_else(|| AppError::InvalidQuery(format!("unknown relation '{}'", filter.name)))?;
        let nested = filter.other.as_deref().ok_or_else(|| {
            AppError::InvalidQuery(format!(
                "'{}' needs a nested field, e.g. '{}.name:{}'",
                filter.name,
                filter.name,
                op.as_str()
            ))
        })?;
        let column = target.get_column(nested).ok_or_else(|| {
            AppError::InvalidQuery(format!("unknown field '{}' on '{}'", nested, filter.name))
        })?;
        let value = coerce(nested, column.kind, argument)?;
        Ok(Condition::Related {
            association: assoc.clone(),
            column: column.name.clone(),
            kind: column.kind,
            target,
            value,
        })
    }
}

fn column_kind(model: &Model, column: &str) -> ColumnKind {
    model.get_column(column).map(|c| c.kind).unwrap_or(ColumnKind::Integer)
}

/// Keep only keys that are columns of `model`; anything else is a validation failure.
fn assignable(model: &Model, properties: Record) -> Result<Record, AppError> {
    let mut errors = Map::new();
    let mut values = Record::new();
    for (key, value) in properties {
        if model.get_column(&key).is_some() {
            values.insert(key, value);
        } else {
            errors.insert(key, Value::from(vec!["Unknown field."]));
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        Err(AppError::Validation(errors))
    }
}

/// "Both null" is no change.
fn is_change(current: &Value, new: &Value) -> bool {
    if current.is_null() != new.is_null() {
        return true;
    }
    match (current, new) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a != b,
            _ => a.as_f64() != b.as_f64(),
        },
        _ => current != new,
    }
}

/// Coerce a querystring argument to the column's storage kind.
fn coerce(field: &str, kind: ColumnKind, raw: &str) -> Result<Value, AppError> {
    let bad = |what: &str| AppError::InvalidQuery(format!("'{}': '{}' is not a valid {}", field, raw, what));
    let raw_trimmed = raw.trim();
    match kind {
        ColumnKind::Integer => raw_trimmed.parse::<i64>().map(Value::from).map_err(|_| bad("integer")),
        ColumnKind::Float => raw_trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| bad("number")),
        ColumnKind::Boolean => match raw_trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(bad("boolean")),
        },
        ColumnKind::Text => Ok(Value::String(raw.to_string())),
        ColumnKind::Timestamp => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw_trimmed) {
                return Ok(Value::String(dt.to_rfc3339()));
            }
            chrono::NaiveDate::parse_from_str(raw_trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Value::String(dt.and_utc().to_rfc3339()))
                .ok_or_else(|| bad("datetime"))
        }
        ColumnKind::Json => Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;
    use serde_json::json;

    fn manager() -> Manager {
        let bank = Model::new("bank")
            .column(Column::text("name").not_null().unique())
            .column(Column::integer("rank"))
            .has_many("accounts", "bank_account", "bank_id");
        let account = Model::new("bank_account")
            .column(Column::text("cbu"))
            .column(Column::integer("bank_id"))
            .belongs_to("bank", "bank", "bank_id");
        let models = Arc::new(ModelRegistry::from_models(vec![bank, account]).unwrap());
        let model = models.get("bank").unwrap().clone();
        Manager::new("banks", model, models, None, false).unwrap()
    }

    #[test]
    fn unknown_operator_wins_over_unknown_field() {
        let err = manager().condition(&Filter::new("age", "blah", Some("30"))).unwrap_err();
        assert!(matches!(err, AppError::UnknownOperator(op) if op == "blah"));
    }

    #[test]
    fn unknown_field_is_invalid_query() {
        let err = manager().condition(&Filter::new("age", "gt", Some("30"))).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery(_)));
    }

    #[test]
    fn arguments_are_coerced() {
        let cond = manager().condition(&Filter::new("rank", "in", Some("1, 2,3"))).unwrap();
        let Condition::Compare { operand, .. } = cond else {
            panic!("expected comparison");
        };
        assert_eq!(operand, Operand::Many(vec![json!(1), json!(2), json!(3)]));

        let err = manager().condition(&Filter::new("rank", "gt", Some("x"))).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery(_)));
    }

    #[test]
    fn relationship_filter_targets_association() {
        let mut filter = Filter::new("accounts", "any", Some("123"));
        filter.other = Some("cbu".into());
        let cond = manager().condition(&filter).unwrap();
        assert!(matches!(cond, Condition::Related { ref column, .. } if column == "cbu"));

        let bare = Filter::new("accounts", "any", Some("123"));
        assert!(matches!(manager().condition(&bare), Err(AppError::InvalidQuery(_))));
    }

    #[test]
    fn unknown_sort_fields_fall_back_to_id() {
        let order = manager().order(&[Sort {
            direction: Direction::Desc,
            field: "nope".into(),
        }]);
        assert_eq!(
            order,
            vec![Order {
                column: "id".into(),
                direction: Direction::Asc
            }]
        );
    }

    #[test]
    fn assignments_are_allow_listed() {
        let props = json!({"name": "X", "evil": 1}).as_object().cloned().unwrap();
        let Err(AppError::Validation(messages)) = assignable(&manager().model, props) else {
            panic!("expected validation error");
        };
        assert_eq!(messages["evil"], json!(["Unknown field."]));
    }

    #[test]
    fn change_detection() {
        assert!(!is_change(&Value::Null, &Value::Null));
        assert!(is_change(&Value::Null, &json!("a")));
        assert!(!is_change(&json!(1), &json!(1.0)));
        assert!(is_change(&json!("a"), &json!("b")));
        assert!(is_change(&json!(9_007_199_254_740_993_i64), &json!(9_007_199_254_740_992_i64)));
    }
}
