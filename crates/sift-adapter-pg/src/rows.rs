//! Conversion of dynamically-typed Postgres rows into JSON.

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row};
use uuid::Uuid;

/// Convert a row to a JSON object, probing column types from most to
/// least specific. Unsupported types degrade to their text form, then
/// to null.
pub fn row_to_json(row: &PgRow) -> Value {
    let mut obj = serde_json::Map::new();

    for col in row.columns() {
        let name = col.name();

        let value: Value = if let Ok(v) = row.try_get::<Option<i64>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<i32>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<i16>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<f32>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<BigDecimal>, _>(name) {
            match v {
                Some(d) => json!(d.to_f64().unwrap_or(0.0)),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<Uuid>, _>(name) {
            match v {
                Some(u) => json!(u.to_string()),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(name) {
            match v {
                Some(dt) => json!(dt.to_rfc3339()),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(name) {
            match v {
                Some(dt) => json!(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(name) {
            match v {
                Some(d) => json!(d.format("%Y-%m-%d").to_string()),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(name) {
            match v {
                Some(t) => json!(t.format("%H:%M:%S").to_string()),
                None => Value::Null,
            }
        } else if let Ok(v) = row.try_get::<Option<Value>, _>(name) {
            v.unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<String>>, _>(name) {
            json!(v)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(name) {
            json!(v)
        } else {
            Value::Null
        };

        obj.insert(name.to_string(), value);
    }

    Value::Object(obj)
}
