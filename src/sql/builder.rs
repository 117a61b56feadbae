//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from model descriptors.

use crate::model::{AssociationKind, ColumnKind, Model, Record};
use crate::query::{Direction, Operator};
use crate::store::{Condition, Operand, Select};
use serde_json::Value;

const MAIN_ALIAS: &str = "main";
const REL_ALIAS: &str = "rel";

/// Quote identifier for PostgreSQL (safe: only from model descriptors).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Clone, Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its placeholder, cast to the column's type.
    fn placeholder(&mut self, v: Value, kind: ColumnKind) -> String {
        self.params.push(v);
        format!("${}::{}", self.params.len(), kind.pg_type())
    }
}

fn column_list(model: &Model, alias: Option<&str>) -> String {
    model
        .columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{}.{}", a, quoted(&c.name)),
            None => quoted(&c.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn pk_kind(model: &Model) -> ColumnKind {
    model
        .get_column(&model.primary_key)
        .map(|c| c.kind)
        .unwrap_or(ColumnKind::Integer)
}

fn first(operand: &Operand) -> Value {
    match operand {
        Operand::One(v) => v.clone(),
        Operand::Many(vs) => vs.first().cloned().unwrap_or(Value::Null),
        Operand::None => Value::Null,
    }
}

fn condition_sql(q: &mut QueryBuf, model: &Model, cond: &Condition) -> String {
    match cond {
        Condition::Compare { column, kind, op, operand } => {
            let col = format!("{}.{}", MAIN_ALIAS, quoted(column));
            match op {
                Operator::IsNull => format!("{} IS NULL", col),
                Operator::IsNotNull => format!("{} IS NOT NULL", col),
                Operator::Eq | Operator::Ne | Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
                    let sym = match op {
                        Operator::Eq => "=",
                        Operator::Ne => "<>",
                        Operator::Gt => ">",
                        Operator::Lt => "<",
                        Operator::Gte => ">=",
                        _ => "<=",
                    };
                    let ph = q.placeholder(first(operand), *kind);
                    format!("{} {} {}", col, sym, ph)
                }
                Operator::Contains => {
                    let ph = q.placeholder(first(operand), ColumnKind::Text);
                    format!("{}::text LIKE '%' || {} || '%'", col, ph)
                }
                Operator::StartsWith => {
                    let ph = q.placeholder(first(operand), ColumnKind::Text);
                    format!("{}::text LIKE {} || '%'", col, ph)
                }
                Operator::EndsWith => {
                    let ph = q.placeholder(first(operand), ColumnKind::Text);
                    format!("{}::text LIKE '%' || {}", col, ph)
                }
                Operator::Like => {
                    let ph = q.placeholder(first(operand), ColumnKind::Text);
                    format!("{}::text LIKE {}", col, ph)
                }
                Operator::ILike => {
                    let ph = q.placeholder(first(operand), ColumnKind::Text);
                    format!("{}::text ILIKE {}", col, ph)
                }
                Operator::In | Operator::NotIn => {
                    let values = match operand {
                        Operand::Many(vs) => vs.clone(),
                        Operand::One(v) => vec![v.clone()],
                        Operand::None => Vec::new(),
                    };
                    if values.is_empty() {
                        return if *op == Operator::In { "FALSE".into() } else { "TRUE".into() };
                    }
                    let phs: Vec<String> = values.into_iter().map(|v| q.placeholder(v, *kind)).collect();
                    let not = if *op == Operator::NotIn { "NOT " } else { "" };
                    format!("{} {}IN ({})", col, not, phs.join(", "))
                }
                // relationship operators are built as Condition::Related
                Operator::Has | Operator::Any => "FALSE".into(),
            }
        }
        Condition::Related {
            association,
            target,
            column,
            kind,
            value,
        } => {
            let (their_key, our_key) = match &association.kind {
                AssociationKind::ToMany { remote_column } => (remote_column.as_str(), model.primary_key.as_str()),
                AssociationKind::ToOne { local_column } => (target.primary_key.as_str(), local_column.as_str()),
            };
            let ph = q.placeholder(value.clone(), *kind);
            format!(
                "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {}.{} AND {}.{} = {})",
                quoted(&target.name),
                REL_ALIAS,
                REL_ALIAS,
                quoted(their_key),
                MAIN_ALIAS,
                quoted(our_key),
                REL_ALIAS,
                quoted(column),
                ph
            )
        }
    }
}

fn where_clause(q: &mut QueryBuf, model: &Model, conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = conditions.iter().map(|c| condition_sql(q, model, c)).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// SELECT with conjoined conditions, ORDER BY, optional LIMIT/OFFSET.
pub fn select(model: &Model, select: &Select) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, model, &select.conditions);
    let order_sql = if select.order.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = select
            .order
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{}.{} {}", MAIN_ALIAS, quoted(&o.column), dir)
            })
            .collect();
        format!(" ORDER BY {}", parts.join(", "))
    };
    let limit_sql = select.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_sql = select.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        column_list(model, Some(MAIN_ALIAS)),
        quoted(&model.name),
        MAIN_ALIAS,
        where_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    q
}

pub fn count(model: &Model, conditions: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, model, conditions);
    q.sql = format!("SELECT COUNT(*) FROM {} {}{}", quoted(&model.name), MAIN_ALIAS, where_sql);
    q
}

/// INSERT the model columns present in `values`, returning the full row.
pub fn insert(model: &Model, values: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut phs = Vec::new();
    for c in &model.columns {
        if let Some(v) = values.get(&c.name) {
            cols.push(quoted(&c.name));
            phs.push(q.placeholder(v.clone(), c.kind));
        }
    }
    let table = quoted(&model.name);
    let returning = column_list(model, None);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            phs.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by primary key, returning the full row. Caller ensures `changes` is non-empty.
pub fn update(model: &Model, id: &Value, changes: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in &model.columns {
        if c.name == model.primary_key {
            continue;
        }
        if let Some(v) = changes.get(&c.name) {
            let ph = q.placeholder(v.clone(), c.kind);
            sets.push(format!("{} = {}", quoted(&c.name), ph));
        }
    }
    let id_ph = q.placeholder(id.clone(), pk_kind(model));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        quoted(&model.name),
        sets.join(", "),
        quoted(&model.primary_key),
        id_ph,
        column_list(model, None)
    );
    q
}

/// DELETE rows matching all conditions.
pub fn delete(model: &Model, conditions: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, model, conditions);
    q.sql = format!("DELETE FROM {} AS {}{}", quoted(&model.name), MAIN_ALIAS, where_sql);
    q
}
