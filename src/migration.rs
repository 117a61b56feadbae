//! DDL from model descriptors: create and drop tables, create the database itself.
//! Tables are created first and foreign keys added afterwards, so declaration order does not matter.

use crate::model::{AssociationKind, Column, ColumnKind, Model, ModelRegistry};
use crate::sql::quoted;
use crate::store::StoreError;
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

fn column_def(model: &Model, c: &Column) -> String {
    let mut def = format!("{} {}", quoted(&c.name), c.kind.pg_type());
    if c.has_default {
        match c.kind {
            ColumnKind::Integer if c.name == model.primary_key => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            ColumnKind::Timestamp => def.push_str(" DEFAULT NOW()"),
            _ => {}
        }
    }
    if !c.nullable {
        def.push_str(" NOT NULL");
    }
    if c.unique && c.name != model.primary_key {
        def.push_str(" UNIQUE");
    }
    def
}

/// `CREATE TABLE IF NOT EXISTS` for one model, without foreign keys.
pub fn create_table_sql(model: &Model) -> String {
    let mut defs: Vec<String> = model.columns.iter().map(|c| column_def(model, c)).collect();
    defs.push(format!("PRIMARY KEY ({})", quoted(&model.primary_key)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        quoted(&model.name),
        defs.join(",\n  ")
    )
}

/// `ALTER TABLE ... ADD CONSTRAINT` for every `belongs_to` association of the model.
pub fn foreign_key_sql(model: &Model, models: &ModelRegistry) -> Vec<String> {
    model
        .associations
        .iter()
        .filter_map(|a| {
            let AssociationKind::ToOne { local_column } = &a.kind else {
                return None;
            };
            let target = models.get(&a.target)?;
            Some(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quoted(&model.name),
                quoted(&format!("{}_{}_fkey", model.name, local_column)),
                quoted(local_column),
                quoted(&target.name),
                quoted(&target.primary_key)
            ))
        })
        .collect()
}

/// Create every registered table, then its foreign keys. Idempotent.
pub async fn create_tables(pool: &PgPool, models: &ModelRegistry) -> Result<(), StoreError> {
    let mut all: Vec<_> = models.iter().collect();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    for model in &all {
        let sql = create_table_sql(model);
        tracing::debug!(table = %model.name, "create table");
        sqlx::query(&sql).execute(pool).await?;
    }
    for model in &all {
        for sql in foreign_key_sql(model, models) {
            // already present on re-runs
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                tracing::debug!(table = %model.name, error = %e, "foreign key not added");
            }
        }
    }
    tracing::info!(tables = all.len(), "tables ready");
    Ok(())
}

/// Drop every registered table (CASCADE).
pub async fn drop_tables(pool: &PgPool, models: &ModelRegistry) -> Result<(), StoreError> {
    for model in models.iter() {
        sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", quoted(&model.name)))
            .execute(pool)
            .await?;
    }
    tracing::info!("tables dropped");
    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = split_database_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StoreError::Backend(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "database created");
    }
    Ok(())
}

/// Admin url (same server, `postgres` database) and the target database name.
fn split_database_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Backend("DATABASE_URL: no path".into()))?
        + 1;
    let db_name = url
        .get(path_start..)
        .unwrap_or("")
        .split('?')
        .next()
        .unwrap_or("")
        .trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
