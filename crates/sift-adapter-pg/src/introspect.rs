//! Schema introspection over information-schema views.
//!
//! Backs the `list_schemas`, `list_tables` and `describe_table` tools.
//! All queries run inside one read-only transaction per call.

use crate::pool::{PoolError, ReadOnlyPg};
use serde_json::{json, Value};
use sqlx::Row;

/// List non-system schemas, alphabetically.
pub async fn list_schemas(pg: &ReadOnlyPg) -> Result<Value, PoolError> {
    let mut tx = pg.begin_read_only().await?;

    let rows = sqlx::query(
        r#"
        select schema_name
        from information_schema.schemata
        where schema_name not in ('pg_catalog', 'information_schema')
        order by schema_name
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let schemas: Vec<String> = rows
        .into_iter()
        .map(|r| r.get::<String, _>("schema_name"))
        .collect();

    Ok(json!({ "schemas": schemas }))
}

/// List base tables and views in a schema (default `public`).
pub async fn list_tables(pg: &ReadOnlyPg, schema: Option<&str>) -> Result<Value, PoolError> {
    let schema = schema.unwrap_or("public");
    let mut tx = pg.begin_read_only().await?;

    let rows = sqlx::query(
        r#"
        select table_name, table_type
        from information_schema.tables
        where table_schema = $1
        order by table_name
        "#,
    )
    .bind(schema)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let tables: Vec<Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "name": r.get::<String, _>("table_name"),
                "type": r.get::<String, _>("table_type"),
            })
        })
        .collect();

    Ok(json!({ "schema": schema, "tables": tables }))
}

/// Describe a table: columns, primary key, foreign keys.
pub async fn describe_table(
    pg: &ReadOnlyPg,
    table: &str,
    schema: Option<&str>,
) -> Result<Value, PoolError> {
    let schema = schema.unwrap_or("public");
    let mut tx = pg.begin_read_only().await?;

    let col_rows = sqlx::query(
        r#"
        select column_name, data_type, is_nullable, column_default
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *tx)
    .await?;

    let mut columns = Vec::new();
    for c in col_rows {
        columns.push(json!({
            "name": c.get::<String, _>("column_name"),
            "data_type": c.get::<String, _>("data_type"),
            "nullable": c.get::<String, _>("is_nullable") == "YES",
            "default": c.get::<Option<String>, _>("column_default"),
        }));
    }

    let pk_rows = sqlx::query(
        r#"
        select kcu.column_name
        from information_schema.table_constraints tc
        join information_schema.key_column_usage kcu
          on tc.constraint_name = kcu.constraint_name
         and tc.table_schema = kcu.table_schema
        where tc.constraint_type = 'PRIMARY KEY'
          and tc.table_schema = $1
          and tc.table_name = $2
        order by kcu.ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *tx)
    .await?;

    let primary_key: Vec<String> = pk_rows
        .into_iter()
        .map(|r| r.get::<String, _>("column_name"))
        .collect();

    let fk_rows = sqlx::query(
        r#"
        select
          kcu.column_name as column_name,
          ccu.table_schema as foreign_table_schema,
          ccu.table_name as foreign_table_name,
          ccu.column_name as foreign_column_name
        from information_schema.table_constraints tc
        join information_schema.key_column_usage kcu
          on tc.constraint_name = kcu.constraint_name
         and tc.table_schema = kcu.table_schema
        join information_schema.constraint_column_usage ccu
          on ccu.constraint_name = tc.constraint_name
         and ccu.table_schema = tc.table_schema
        where tc.constraint_type = 'FOREIGN KEY'
          and tc.table_schema = $1
          and tc.table_name = $2
        order by kcu.ordinal_position
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    let foreign_keys: Vec<Value> = fk_rows
        .into_iter()
        .map(|fk| {
            json!({
                "column": fk.get::<String, _>("column_name"),
                "references": {
                    "schema": fk.get::<String, _>("foreign_table_schema"),
                    "table": fk.get::<String, _>("foreign_table_name"),
                    "column": fk.get::<String, _>("foreign_column_name"),
                }
            })
        })
        .collect();

    Ok(json!({
        "schema": schema,
        "table": table,
        "columns": columns,
        "primary_key": primary_key,
        "foreign_keys": foreign_keys,
    }))
}
