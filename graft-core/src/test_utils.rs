//! Helpers for tests that run against a private in-memory database.

use sqlx::Row;

use crate::database::Graft;
use crate::error::GraftResult;
use crate::executor::{self, ensure_identifier};
use crate::value::BindValue;

/// A fresh `sqlite::memory:` database nobody else sees.
pub async fn memory_graft() -> GraftResult<Graft> {
    Graft::memory().await
}

/// Number of rows in `table`, read outside any model metadata.
pub async fn count_rows(db: &Graft, table: &str) -> GraftResult<i64> {
    ensure_identifier(table)?;
    scalar_i64(db, &format!("SELECT COUNT(*) FROM {}", table), Vec::new()).await
}

/// Runs a query returning one integer, e.g. a foreign-key column.
pub async fn scalar_i64(db: &Graft, sql: &str, binds: Vec<BindValue>) -> GraftResult<i64> {
    let handle = db.lock().await;
    let mut conn = handle.pool.acquire().await?;
    let rows = executor::fetch_rows(&mut conn, "test", "", sql, binds).await?;
    match rows.first() {
        Some(row) => Ok(row.try_get::<Option<i64>, _>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

/// Runs raw SQL, for fixtures the models cannot express.
pub async fn execute_raw(db: &Graft, sql: &str) -> GraftResult<u64> {
    let handle = db.lock().await;
    let mut conn = handle.pool.acquire().await?;
    let result = executor::execute(&mut conn, "test", "", sql, Vec::new()).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_rows_of_raw_tables() {
        let db = memory_graft().await.unwrap();
        execute_raw(&db, "CREATE TABLE marks (id INTEGER PRIMARY KEY, owner INTEGER)")
            .await
            .unwrap();
        execute_raw(&db, "INSERT INTO marks (owner) VALUES (7), (NULL)")
            .await
            .unwrap();
        assert_eq!(count_rows(&db, "marks").await.unwrap(), 2);
        let owner = scalar_i64(&db, "SELECT owner FROM marks WHERE id = ?", vec![BindValue::I64(2)])
            .await
            .unwrap();
        assert_eq!(owner, 0);
        assert!(count_rows(&db, "marks; --").await.is_err());
    }
}
