//! In-process store for tests and `NAS_MODE=test`.
//!
//! Sessions read and write a private snapshot of the tables and log their writes. `commit`
//! replays the log onto the shared tables, re-checking constraints, so uncommitted work is
//! never visible to other sessions. Constraint checks mirror the DDL in `migration`:
//! not-null, unique, and foreign keys declared by `belongs_to` associations (restrict on delete).

use crate::model::{AssociationKind, ColumnKind, Model, ModelRegistry, Record};
use crate::query::{Direction, Operator};
use crate::sql;
use crate::store::{Condition, Operand, Order, Select, Session, Store, StoreError};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Tables = HashMap<String, Vec<Record>>;

#[derive(Default)]
struct Shared {
    tables: Tables,
    /// Per-table id sequences. Like database sequences, never rolled back.
    sequences: HashMap<String, i64>,
}

#[derive(Clone)]
pub struct MemoryStore {
    models: Arc<ModelRegistry>,
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new(models: Arc<ModelRegistry>) -> Self {
        MemoryStore {
            models,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Committed rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        Ok(lock(&self.shared)?.tables.get(table).cloned().unwrap_or_default())
    }
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, StoreError> {
    shared
        .lock()
        .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError> {
        Ok(Box::new(MemorySession {
            models: self.models.clone(),
            shared: self.shared.clone(),
            snapshot: None,
            log: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Op {
    Insert { table: String, row: Record },
    Update { table: String, id: Value, changes: Record },
    Delete { table: String, ids: Vec<Value> },
}

pub struct MemorySession {
    models: Arc<ModelRegistry>,
    shared: Arc<Mutex<Shared>>,
    snapshot: Option<Tables>,
    log: Vec<Op>,
}

impl MemorySession {
    fn tables(&mut self) -> Result<&mut Tables, StoreError> {
        if self.snapshot.is_none() {
            let tables = lock(&self.shared)?.tables.clone();
            self.snapshot = Some(tables);
        }
        self.snapshot
            .as_mut()
            .ok_or_else(|| StoreError::Backend("snapshot not available".into()))
    }

    fn next_id(&self, table: &str) -> Result<i64, StoreError> {
        let mut shared = lock(&self.shared)?;
        let seq = shared.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn select(&mut self, model: &Model, select: &Select) -> Result<Vec<Record>, StoreError> {
        let tables: &Tables = self.tables()?;
        let mut rows = Vec::new();
        for row in tables.get(&model.name).into_iter().flatten() {
            if all_match(tables, model, row, &select.conditions)? {
                rows.push(project(model, row));
            }
        }
        sort_rows(&mut rows, &select.order, model);
        let offset = select.offset.unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(offset);
        Ok(match select.limit {
            Some(n) => rows.take(n as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError> {
        let tables: &Tables = self.tables()?;
        let mut n = 0;
        for row in tables.get(&model.name).into_iter().flatten() {
            if all_match(tables, model, row, conditions)? {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn insert(&mut self, model: &Model, values: &Record) -> Result<Record, StoreError> {
        let mut row = Record::new();
        for c in &model.columns {
            let v = match values.get(&c.name) {
                Some(v) => v.clone(),
                None if c.has_default && c.name == model.primary_key => Value::from(self.next_id(&model.name)?),
                None if c.has_default && c.kind == ColumnKind::Timestamp => Value::String(chrono::Utc::now().to_rfc3339()),
                None => Value::Null,
            };
            row.insert(c.name.clone(), v);
        }
        let models = self.models.clone();
        let tables = self.tables()?;
        check_row(&models, tables, model, &row, None)
            .map_err(|message| integrity(message, sql::insert(model, values)))?;
        tables.entry(model.name.clone()).or_default().push(row.clone());
        tracing::debug!(table = %model.name, "memory insert");
        self.log.push(Op::Insert {
            table: model.name.clone(),
            row: row.clone(),
        });
        Ok(row)
    }

    async fn update(&mut self, model: &Model, id: &Value, changes: &Record) -> Result<Option<Record>, StoreError> {
        let changes: Record = changes
            .iter()
            .filter(|(k, _)| **k != model.primary_key && model.get_column(k).is_some())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let models = self.models.clone();
        let tables = self.tables()?;
        let Some(current) = find_by_pk(tables, model, id).cloned() else {
            return Ok(None);
        };
        if changes.is_empty() {
            return Ok(Some(current));
        }
        let mut updated = current;
        for (k, v) in &changes {
            updated.insert(k.clone(), v.clone());
        }
        check_row(&models, tables, model, &updated, Some(id))
            .map_err(|message| integrity(message, sql::update(model, id, &changes)))?;
        if let Some(slot) = find_by_pk_mut(tables, model, id) {
            *slot = updated.clone();
        }
        self.log.push(Op::Update {
            table: model.name.clone(),
            id: id.clone(),
            changes,
        });
        Ok(Some(updated))
    }

    async fn delete(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError> {
        let models = self.models.clone();
        let tables = self.tables()?;
        let mut ids = Vec::new();
        for row in tables.get(&model.name).into_iter().flatten() {
            if all_match(tables, model, row, conditions)? {
                ids.push(row.get(&model.primary_key).cloned().unwrap_or(Value::Null));
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }
        check_not_referenced(&models, tables, model, &ids)
            .map_err(|message| integrity(message, sql::delete(model, conditions)))?;
        remove_ids(tables, model, &ids);
        let n = ids.len() as u64;
        self.log.push(Op::Delete {
            table: model.name.clone(),
            ids,
        });
        Ok(n)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let log = std::mem::take(&mut self.log);
        self.snapshot = None;
        if log.is_empty() {
            return Ok(());
        }
        let mut shared = lock(&self.shared)?;
        let mut next = shared.tables.clone();
        for op in &log {
            replay(&self.models, &mut next, op)?;
        }
        shared.tables = next;
        tracing::debug!(ops = log.len(), "memory commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.log.clear();
        self.snapshot = None;
        Ok(())
    }
}

fn integrity(message: String, q: sql::QueryBuf) -> StoreError {
    StoreError::Integrity {
        message,
        statement: Some(q.sql),
        params: q.params,
    }
}

fn replay(models: &ModelRegistry, tables: &mut Tables, op: &Op) -> Result<(), StoreError> {
    let model_of = |table: &str| {
        models
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("unknown table '{}'", table)))
    };
    match op {
        Op::Insert { table, row } => {
            let model = model_of(table)?;
            check_row(models, tables, &model, row, None).map_err(|message| integrity(message, sql::insert(&model, row)))?;
            tables.entry(table.clone()).or_default().push(row.clone());
        }
        Op::Update { table, id, changes } => {
            let model = model_of(table)?;
            let Some(mut updated) = find_by_pk(tables, &model, id).cloned() else {
                return Ok(());
            };
            for (k, v) in changes {
                updated.insert(k.clone(), v.clone());
            }
            check_row(models, tables, &model, &updated, Some(id))
                .map_err(|message| integrity(message, sql::update(&model, id, changes)))?;
            if let Some(slot) = find_by_pk_mut(tables, &model, id) {
                *slot = updated;
            }
        }
        Op::Delete { table, ids } => {
            let model = model_of(table)?;
            check_not_referenced(models, tables, &model, ids).map_err(|message| {
                integrity(message, sql::QueryBuf {
                    sql: format!("DELETE FROM {}", sql::quoted(table)),
                    params: ids.clone(),
                })
            })?;
            remove_ids(tables, &model, ids);
        }
    }
    Ok(())
}

fn project(model: &Model, row: &Record) -> Record {
    model
        .columns
        .iter()
        .map(|c| (c.name.clone(), row.get(&c.name).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn find_by_pk<'a>(tables: &'a Tables, model: &Model, id: &Value) -> Option<&'a Record> {
    tables
        .get(&model.name)?
        .iter()
        .find(|r| r.get(&model.primary_key).is_some_and(|v| values_equal(v, id)))
}

fn find_by_pk_mut<'a>(tables: &'a mut Tables, model: &Model, id: &Value) -> Option<&'a mut Record> {
    tables
        .get_mut(&model.name)?
        .iter_mut()
        .find(|r| r.get(&model.primary_key).is_some_and(|v| values_equal(v, id)))
}

fn remove_ids(tables: &mut Tables, model: &Model, ids: &[Value]) {
    if let Some(rows) = tables.get_mut(&model.name) {
        rows.retain(|r| {
            let pk = r.get(&model.primary_key).unwrap_or(&Value::Null);
            !ids.iter().any(|id| values_equal(pk, id))
        });
    }
}

/// Not-null, unique and outgoing foreign key checks for a row about to be stored.
/// `replacing` is the primary key of the row being updated, excluded from uniqueness.
fn check_row(
    models: &ModelRegistry,
    tables: &Tables,
    model: &Model,
    row: &Record,
    replacing: Option<&Value>,
) -> Result<(), String> {
    let others: Vec<&Record> = tables
        .get(&model.name)
        .into_iter()
        .flatten()
        .filter(|r| match replacing {
            Some(id) => !r.get(&model.primary_key).is_some_and(|v| values_equal(v, id)),
            None => true,
        })
        .collect();
    for c in &model.columns {
        let value = row.get(&c.name).unwrap_or(&Value::Null);
        if value.is_null() {
            if !c.nullable {
                return Err(format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    c.name, model.name
                ));
            }
            continue;
        }
        let unique = c.unique || c.name == model.primary_key;
        if unique && others.iter().any(|r| r.get(&c.name).is_some_and(|v| values_equal(v, value))) {
            return Err(format!(
                "duplicate key value violates unique constraint \"{}_{}_key\"",
                model.name, c.name
            ));
        }
    }
    for assoc in &model.associations {
        let AssociationKind::ToOne { local_column } = &assoc.kind else {
            continue;
        };
        let value = row.get(local_column).unwrap_or(&Value::Null);
        if value.is_null() {
            continue;
        }
        let Some(target) = models.get(&assoc.target) else {
            continue;
        };
        if find_by_pk(tables, target, value).is_none() {
            return Err(format!(
                "insert or update on table \"{}\" violates foreign key constraint \"{}_{}_fkey\"",
                model.name, model.name, local_column
            ));
        }
    }
    Ok(())
}

/// Restrict deletes of rows still referenced by a `belongs_to` foreign key.
fn check_not_referenced(models: &ModelRegistry, tables: &Tables, model: &Model, ids: &[Value]) -> Result<(), String> {
    for other in models.iter() {
        for assoc in other.associations.iter().filter(|a| a.target == model.name) {
            let AssociationKind::ToOne { local_column } = &assoc.kind else {
                continue;
            };
            let referenced = tables.get(&other.name).into_iter().flatten().any(|r| {
                r.get(local_column)
                    .is_some_and(|v| ids.iter().any(|id| values_equal(v, id)))
            });
            if referenced {
                return Err(format!(
                    "update or delete on table \"{}\" violates foreign key constraint \"{}_{}_fkey\" on table \"{}\"",
                    model.name, other.name, local_column, other.name
                ));
            }
        }
    }
    Ok(())
}

fn all_match(tables: &Tables, model: &Model, row: &Record, conditions: &[Condition]) -> Result<bool, StoreError> {
    for cond in conditions {
        if !matches(tables, model, row, cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches(tables: &Tables, model: &Model, row: &Record, cond: &Condition) -> Result<bool, StoreError> {
    match cond {
        Condition::Compare { column, kind, op, operand } => {
            let value = row.get(column).unwrap_or(&Value::Null);
            compare(value, *kind, *op, operand)
        }
        Condition::Related {
            association,
            target,
            column,
            kind,
            value,
        } => {
            let candidates = tables.get(&target.name).into_iter().flatten();
            let hit = |r: &&Record| {
                r.get(column)
                    .is_some_and(|v| compare_values(v, value, *kind) == Some(Ordering::Equal))
            };
            Ok(match &association.kind {
                AssociationKind::ToMany { remote_column } => {
                    let pk = row.get(&model.primary_key).unwrap_or(&Value::Null);
                    candidates
                        .filter(|r| r.get(remote_column).is_some_and(|v| values_equal(v, pk)))
                        .any(|r| hit(&r))
                }
                AssociationKind::ToOne { local_column } => {
                    let fk = row.get(local_column).unwrap_or(&Value::Null);
                    candidates
                        .filter(|r| r.get(&target.primary_key).is_some_and(|v| values_equal(v, fk)))
                        .any(|r| hit(&r))
                }
            })
        }
    }
}

fn compare(value: &Value, kind: ColumnKind, op: Operator, operand: &Operand) -> Result<bool, StoreError> {
    let arg = match operand {
        Operand::One(v) => v.clone(),
        Operand::Many(vs) => vs.first().cloned().unwrap_or(Value::Null),
        Operand::None => Value::Null,
    };
    let ord = || compare_values(value, &arg, kind);
    Ok(match op {
        Operator::IsNull => value.is_null(),
        Operator::IsNotNull => !value.is_null(),
        Operator::Eq => ord() == Some(Ordering::Equal),
        Operator::Ne => matches!(ord(), Some(o) if o != Ordering::Equal),
        Operator::Gt => ord() == Some(Ordering::Greater),
        Operator::Lt => ord() == Some(Ordering::Less),
        Operator::Gte => matches!(ord(), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lte => matches!(ord(), Some(Ordering::Less | Ordering::Equal)),
        Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Like | Operator::ILike => {
            let (Some(text), Some(pattern)) = (as_text(value), as_text(&arg)) else {
                return Ok(false);
            };
            match op {
                Operator::Contains => text.contains(&pattern),
                Operator::StartsWith => text.starts_with(&pattern),
                Operator::EndsWith => text.ends_with(&pattern),
                Operator::Like => like(&pattern, false)?.is_match(&text),
                _ => like(&pattern, true)?.is_match(&text),
            }
        }
        Operator::In | Operator::NotIn => {
            if value.is_null() {
                return Ok(false);
            }
            let values: Vec<&Value> = match operand {
                Operand::Many(vs) => vs.iter().collect(),
                Operand::One(v) => vec![v],
                Operand::None => Vec::new(),
            };
            let found = values
                .iter()
                .any(|v| compare_values(value, v, kind) == Some(Ordering::Equal));
            if op == Operator::In {
                found
            } else {
                !found
            }
        }
        Operator::Has | Operator::Any => false,
    })
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// SQL LIKE pattern to an anchored regex: `%` any run, `_` any single char.
fn like(pattern: &str, case_insensitive: bool) -> Result<Regex, StoreError> {
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                re.push_str(&regex::escape(&literal));
                literal.clear();
                re.push_str(if ch == '%' { ".*" } else { "." });
            }
            c => literal.push(c),
        }
    }
    re.push_str(&regex::escape(&literal));
    re.push('$');
    Regex::new(&re).map_err(|e| StoreError::Backend(e.to_string()))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// SQL-like comparison: `None` when either side is null or the types are incomparable.
fn compare_values(a: &Value, b: &Value, kind: ColumnKind) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) if kind == ColumnKind::Timestamp => {
            let x = chrono::DateTime::parse_from_rfc3339(x).ok()?;
            let y = chrono::DateTime::parse_from_rfc3339(y).ok()?;
            Some(x.cmp(&y))
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        (x, y) if kind == ColumnKind::Json => (x == y).then_some(Ordering::Equal),
        _ => None,
    }
}

/// Nulls sort after every value ascending and before them descending, as PostgreSQL does.
fn sort_rows(rows: &mut [Record], order: &[Order], model: &Model) {
    rows.sort_by(|a, b| {
        for o in order {
            let kind = model.get_column(&o.column).map(|c| c.kind).unwrap_or(ColumnKind::Text);
            let x = a.get(&o.column).unwrap_or(&Value::Null);
            let y = b.get(&o.column).unwrap_or(&Value::Null);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_values(x, y, kind).unwrap_or(Ordering::Equal),
            };
            let ord = match o.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
