//! Scalar collection fields such as `tags: Vec<String>`.
//!
//! A collection is stored in its own table `<owner table>_<field>` with two
//! columns: the owner's foreign key and one value column named after the
//! field. Value rows have no id, so writing a collection always replaces
//! the owner's whole set.

use std::collections::HashMap;

use sqlx::{Decode, Row, Sqlite, SqliteConnection, Type};

use crate::error::GraftResult;
use crate::executor::{self, CHUNK_SIZE, placeholders};
use crate::value::BindValue;

/// Storage of one collection field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// Struct field, also the name of the value column.
    pub field: &'static str,
    pub owner_table: &'static str,
    /// Column holding the owner id (`<model>_id`).
    pub owner_column: &'static str,
    /// Declared SQL type of the values.
    pub sql_type: &'static str,
    pub table: String,
}

impl Collection {
    pub fn new(
        field: &'static str,
        owner_table: &'static str,
        owner_column: &'static str,
        sql_type: &'static str,
    ) -> Self {
        Self {
            field,
            owner_table,
            owner_column,
            sql_type,
            table: format!("{}_{}", owner_table, field),
        }
    }

    /// Value rows go away with their owner even when the owner is removed
    /// by a cascade or a raw table delete.
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} ({owner} INTEGER NOT NULL \
             REFERENCES {owner_table}(id) ON DELETE CASCADE, {field} {sql_type})",
            table = self.table,
            owner = self.owner_column,
            owner_table = self.owner_table,
            field = self.field,
            sql_type = self.sql_type,
        )
    }
}

/// Replaces the values stored for `owner` with `values`, in order.
pub(crate) async fn replace(
    conn: &mut SqliteConnection,
    collection: &Collection,
    owner: i64,
    values: &[BindValue],
) -> GraftResult<()> {
    clear(conn, collection, &[owner]).await?;
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES (?, ?)",
        collection.table, collection.owner_column, collection.field
    );
    for value in values {
        executor::execute(
            conn,
            "collection_insert",
            &collection.table,
            &sql,
            vec![BindValue::I64(owner), value.clone()],
        )
        .await?;
    }
    Ok(())
}

/// Removes every value stored for `owners`.
pub(crate) async fn clear(
    conn: &mut SqliteConnection,
    collection: &Collection,
    owners: &[i64],
) -> GraftResult<u64> {
    let mut removed = 0;
    for chunk in owners.chunks(CHUNK_SIZE) {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            collection.table,
            collection.owner_column,
            placeholders(chunk.len())
        );
        let binds = chunk.iter().map(|id| BindValue::I64(*id)).collect();
        let done = executor::execute(conn, "collection_clear", &collection.table, &sql, binds).await?;
        removed += done.rows_affected();
    }
    Ok(removed)
}

/// Reads the values of `collection` for every owner in `owners`, in
/// insertion order. Owners without values are absent from the map.
pub async fn load<T>(
    conn: &mut SqliteConnection,
    collection: &Collection,
    owners: &[i64],
) -> GraftResult<HashMap<i64, Vec<T>>>
where
    T: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
{
    let mut grouped: HashMap<i64, Vec<T>> = HashMap::new();
    for chunk in owners.chunks(CHUNK_SIZE) {
        let sql = format!(
            "SELECT {owner}, {field} FROM {table} WHERE {owner} IN ({marks}) ORDER BY rowid",
            owner = collection.owner_column,
            field = collection.field,
            table = collection.table,
            marks = placeholders(chunk.len()),
        );
        let binds = chunk.iter().map(|id| BindValue::I64(*id)).collect();
        let rows = executor::fetch_rows(conn, "collection_load", &collection.table, &sql, binds).await?;
        for row in &rows {
            let owner: i64 = row.try_get(0)?;
            grouped.entry(owner).or_default().push(row.try_get(1)?);
        }
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    fn tags() -> Collection {
        Collection::new("tags", "notes", "note_id", "TEXT")
    }

    async fn notes() -> SqliteConnection {
        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO notes (id) VALUES (1), (2)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query(&tags().create_table_sql())
            .execute(&mut conn)
            .await
            .unwrap();
        conn
    }

    #[test]
    fn table_is_named_after_owner_and_field() {
        let collection = tags();
        assert_eq!(collection.table, "notes_tags");
        assert_eq!(
            collection.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS notes_tags (note_id INTEGER NOT NULL \
             REFERENCES notes(id) ON DELETE CASCADE, tags TEXT)"
        );
    }

    #[tokio::test]
    async fn replace_keeps_order_and_drops_old_values() {
        let mut conn = notes().await;
        let collection = tags();
        replace(&mut conn, &collection, 1, &["b".into(), "a".into()]).await.unwrap();
        replace(&mut conn, &collection, 2, &["x".into()]).await.unwrap();
        replace(&mut conn, &collection, 1, &["c".into(), "b".into(), "c".into()])
            .await
            .unwrap();

        let loaded = load::<String>(&mut conn, &collection, &[1, 2, 3]).await.unwrap();
        assert_eq!(loaded[&1], vec!["c", "b", "c"]);
        assert_eq!(loaded[&2], vec!["x"]);
        assert!(!loaded.contains_key(&3));

        assert_eq!(clear(&mut conn, &collection, &[1, 2]).await.unwrap(), 4);
        assert!(load::<String>(&mut conn, &collection, &[1, 2]).await.unwrap().is_empty());
    }
}
