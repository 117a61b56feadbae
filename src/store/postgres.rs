//! PostgreSQL store over a sqlx pool. Each session owns one lazily started transaction.

use crate::model::{Model, Record};
use crate::sql::{self, PgBindValue, QueryBuf};
use crate::store::{Condition, Select, Session, Store, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Postgres, Transaction};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn session(&self) -> Result<Box<dyn Session>, StoreError> {
        Ok(Box::new(PgSession {
            pool: self.pool.clone(),
            tx: None,
        }))
    }
}

pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgSession {
    async fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::Backend("transaction not available".into()))
    }

    async fn fetch_all(&mut self, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let conn = self.conn().await?;
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let rows = query.fetch_all(&mut *conn).await.map_err(|e| classify(e, q))?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn fetch_optional(&mut self, q: &QueryBuf) -> Result<Option<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let conn = self.conn().await?;
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let row = query.fetch_optional(&mut *conn).await.map_err(|e| classify(e, q))?;
        Ok(row.map(|r| row_to_record(&r)))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn select(&mut self, model: &Model, select: &Select) -> Result<Vec<Record>, StoreError> {
        let q = sql::select(model, select);
        self.fetch_all(&q).await
    }

    async fn count(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError> {
        let q = sql::count(model, conditions);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let conn = self.conn().await?;
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let n = query.fetch_one(&mut *conn).await.map_err(|e| classify(e, &q))?;
        Ok(n.max(0) as u64)
    }

    async fn insert(&mut self, model: &Model, values: &Record) -> Result<Record, StoreError> {
        let q = sql::insert(model, values);
        self.fetch_optional(&q)
            .await?
            .ok_or_else(|| StoreError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(&mut self, model: &Model, id: &Value, changes: &Record) -> Result<Option<Record>, StoreError> {
        let has_changes = changes.keys().any(|k| *k != model.primary_key && model.get_column(k).is_some());
        if !has_changes {
            let pk_kind = model
                .get_column(&model.primary_key)
                .map(|c| c.kind)
                .unwrap_or(crate::model::ColumnKind::Integer);
            let select = Select {
                conditions: vec![Condition::eq(&model.primary_key, pk_kind, id.clone())],
                limit: Some(1),
                ..Select::default()
            };
            return Ok(self.select(model, &select).await?.into_iter().next());
        }
        let q = sql::update(model, id, changes);
        self.fetch_optional(&q).await
    }

    async fn delete(&mut self, model: &Model, conditions: &[Condition]) -> Result<u64, StoreError> {
        let q = sql::delete(model, conditions);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let conn = self.conn().await?;
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let done = query.execute(&mut *conn).await.map_err(|e| classify(e, &q))?;
        Ok(done.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(|e| classify(e, &commit_buf()))?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn commit_buf() -> QueryBuf {
    QueryBuf {
        sql: "COMMIT".into(),
        params: Vec::new(),
    }
}

/// Constraint violations become `Integrity` with the failing statement; anything else stays a db error.
fn classify(e: sqlx::Error, q: &QueryBuf) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(
            db.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ) {
            return StoreError::Integrity {
                message: db.message().to_string(),
                statement: Some(q.sql.clone()),
                params: q.params.clone(),
            };
        }
    }
    StoreError::Db(e)
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Record::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
