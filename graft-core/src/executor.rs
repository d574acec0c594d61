//! Statement execution on the single engine connection.
//!
//! Every statement the engines issue goes through here so that it is
//! parameterized, logged and (with the `metrics` feature) measured the
//! same way.

use std::time::Instant;

use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, SqliteConnection};

use crate::error::{GraftError, GraftResult};
use crate::metrics::record_query_metrics;
use crate::model::Model;
use crate::value::{BindValue, bind_value, format_binds_for_log};

/// SQLite caps host parameters per statement; id lists are split below it.
pub(crate) const CHUNK_SIZE: usize = 500;

/// `?, ?, ?` for `count` parameters.
pub(crate) fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}

/// Accepts plain SQL identifiers only; table and column names cannot be
/// bound as parameters.
pub(crate) fn ensure_identifier(name: &str) -> GraftResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(GraftError::shape(format!("invalid identifier: {:?}", name)))
    }
}

pub(crate) async fn execute(
    conn: &mut SqliteConnection,
    operation: &'static str,
    table: &str,
    sql: &str,
    binds: Vec<BindValue>,
) -> GraftResult<SqliteQueryResult> {
    tracing::debug!(
        operation,
        table,
        sql = %sql,
        binds = %format_binds_for_log(&binds),
        "graft query"
    );
    let start = Instant::now();
    let query = binds.into_iter().fold(sqlx::query(sql), bind_value);
    let result = query.execute(&mut *conn).await?;
    record_query_metrics(operation, table, start.elapsed());
    Ok(result)
}

pub(crate) async fn fetch_rows(
    conn: &mut SqliteConnection,
    operation: &'static str,
    table: &str,
    sql: &str,
    binds: Vec<BindValue>,
) -> GraftResult<Vec<SqliteRow>> {
    tracing::debug!(
        operation,
        table,
        sql = %sql,
        binds = %format_binds_for_log(&binds),
        "graft query"
    );
    let start = Instant::now();
    let query = binds.into_iter().fold(sqlx::query(sql), bind_value);
    let rows = query.fetch_all(&mut *conn).await?;
    record_query_metrics(operation, table, start.elapsed());
    Ok(rows)
}

pub(crate) async fn fetch_models<M: Model>(
    conn: &mut SqliteConnection,
    operation: &'static str,
    sql: &str,
    binds: Vec<BindValue>,
) -> GraftResult<Vec<M>> {
    let rows = fetch_rows(conn, operation, M::table_name(), sql, binds).await?;
    let mut models = rows
        .iter()
        .map(|row| M::from_row(row))
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    M::load_collections(&mut models, conn).await?;
    Ok(models)
}

/// Runs a query whose first column is a row id.
pub(crate) async fn fetch_ids(
    conn: &mut SqliteConnection,
    operation: &'static str,
    table: &str,
    sql: &str,
    binds: Vec<BindValue>,
) -> GraftResult<Vec<i64>> {
    let rows = fetch_rows(conn, operation, table, sql, binds).await?;
    let ids = rows
        .iter()
        .map(|row| row.try_get::<i64, _>(0))
        .collect::<Result<Vec<_>, sqlx::Error>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    #[test]
    fn placeholders_are_comma_separated() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn identifiers_reject_sql() {
        assert!(ensure_identifier("students").is_ok());
        assert!(ensure_identifier("_tmp1").is_ok());
        assert!(ensure_identifier("").is_err());
        assert!(ensure_identifier("1abc").is_err());
        assert!(ensure_identifier("name; DROP TABLE x").is_err());
    }

    #[tokio::test]
    async fn execute_and_fetch_ids_round_trip() {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        execute(
            &mut conn,
            "create",
            "notes",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)",
            Vec::new(),
        )
        .await
        .unwrap();
        let result = execute(
            &mut conn,
            "insert",
            "notes",
            "INSERT INTO notes (body) VALUES (?), (?)",
            vec![BindValue::from("a"), BindValue::from("b")],
        )
        .await
        .unwrap();
        assert_eq!(result.rows_affected(), 2);

        let ids = fetch_ids(
            &mut conn,
            "select",
            "notes",
            "SELECT id FROM notes WHERE body = ?",
            vec![BindValue::from("b")],
        )
        .await
        .unwrap();
        assert_eq!(ids, vec![2]);
    }
}
