//! Storage capability used by the manager: queryable, transactional sessions over models.
//!
//! A [`Session`] is one request's unit of work. Writes stay pending until `commit`;
//! dropping a session without committing discards them.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::model::{Association, ColumnKind, Model, Record};
use crate::query::{Direction, Operator};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unique, foreign key, not-null or check constraint violation.
    #[error("integrity violation: {message}")]
    Integrity {
        message: String,
        statement: Option<String>,
        params: Vec<Value>,
    },
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Backend(String),
}

/// Argument of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    None,
    One(Value),
    Many(Vec<Value>),
}

/// A backend predicate. Conditions in a list are conjoined.
#[derive(Clone, Debug)]
pub enum Condition {
    Compare {
        column: String,
        kind: ColumnKind,
        op: Operator,
        operand: Operand,
    },
    /// `column = value` on an entity reachable through `association`.
    Related {
        association: Association,
        target: Arc<Model>,
        column: String,
        kind: ColumnKind,
        value: Value,
    },
}

impl Condition {
    pub fn compare(column: &str, kind: ColumnKind, op: Operator, operand: Operand) -> Self {
        Condition::Compare {
            column: column.to_string(),
            kind,
            op,
            operand,
        }
    }

    pub fn eq(column: &str, kind: ColumnKind, value: Value) -> Self {
        Condition::compare(column, kind, Operator::Eq, Operand::One(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, Default)]
pub struct Select {
    pub conditions: Vec<Condition>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError>;
}

#[async_trait]
pub trait Session: Send {
    async fn select(&mut self, model: &Model, select: &Select) -> Result<Vec<Record>, StoreError>;

    async fn count(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError>;

    /// Insert model columns present in `values`; returns the stored row.
    async fn insert(&mut self, model: &Model, values: &Record) -> Result<Record, StoreError>;

    /// Update by primary key; `None` when no such row.
    async fn update(&mut self, model: &Model, id: &Value, changes: &Record) -> Result<Option<Record>, StoreError>;

    /// Delete rows matching all conditions; returns rows affected.
    async fn delete(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
