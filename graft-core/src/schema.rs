//! Table creation for models and SQLite schema introspection.

use sqlx::{Row, SqliteConnection};

use crate::database::{Graft, finish};
use crate::error::{GraftError, GraftResult};
use crate::executor::{self, ensure_identifier};
use crate::model::Model;
use crate::relation::{ForeignKey, check_relations};
use crate::value::BindValue;

/// Metadata about a database column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaColumn {
    pub name: String,
    /// Declared SQL type, e.g. `INTEGER` or `TEXT`.
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Metadata about a database table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTable {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
}

impl SchemaTable {
    /// Returns a column by name if it exists in the table.
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

impl Graft {
    /// Creates the table of `M`, its foreign-key columns, its join tables
    /// and the tables of its collection fields.
    ///
    /// Foreign keys always live on the owning side. When that side's table
    /// does not exist yet, the column is remembered and added when the
    /// owning model is synced.
    #[tracing::instrument(skip(self), fields(table = M::table_name()))]
    pub async fn sync<M: Model>(&self) -> GraftResult<()> {
        check_relations(M::table_name(), &M::relations())?;
        let mut handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let table = M::table_name();
        let mut deferred = Vec::new();

        let result = async {
            executor::execute(&mut tx, "create_table", table, &M::create_table_sql(), Vec::new())
                .await?;
            for collection in M::collections() {
                let sql = collection.create_table_sql();
                executor::execute(&mut tx, "create_table", &collection.table, &sql, Vec::new())
                    .await?;
            }
            for relation in M::relations() {
                match &relation.key {
                    ForeignKey::Local { column } => {
                        ensure_column(&mut tx, table, column).await?;
                    }
                    ForeignKey::Remote { column, .. } => {
                        if table_exists(&mut tx, relation.table).await? {
                            ensure_column(&mut tx, relation.table, column).await?;
                        } else {
                            deferred.push((relation.table, *column));
                        }
                    }
                    ForeignKey::Join {
                        table: join_table,
                        local_column,
                        remote_column,
                    } => {
                        let sql = format!(
                            "CREATE TABLE IF NOT EXISTS {} ({} INTEGER, {} INTEGER)",
                            join_table, local_column, remote_column
                        );
                        executor::execute(&mut tx, "create_table", join_table, &sql, Vec::new())
                            .await?;
                    }
                }
            }
            Ok::<(), GraftError>(())
        }
        .await;

        let result = match result {
            Ok(()) => {
                let pending = handle.pending_columns.get(table).cloned().unwrap_or_default();
                let mut applied = Ok(());
                for column in pending {
                    applied = ensure_column(&mut tx, table, column).await;
                    if applied.is_err() {
                        break;
                    }
                }
                applied
            }
            Err(err) => Err(err),
        };

        finish(tx, "sync", result).await?;
        handle.pending_columns.remove(table);
        for (other, column) in deferred {
            tracing::info!(table = other, column, "graft deferred foreign key column");
            handle
                .pending_columns
                .entry(other.to_owned())
                .or_default()
                .insert(column);
        }
        Ok(())
    }

    /// Introspects one table; `None` when it does not exist.
    pub async fn describe(&self, table: &str) -> GraftResult<Option<SchemaTable>> {
        ensure_identifier(table)?;
        let handle = self.lock().await;
        let mut conn = handle.pool.acquire().await?;
        describe_table(&mut conn, table).await
    }

    /// Names of all user tables, sorted.
    pub async fn tables(&self) -> GraftResult<Vec<String>> {
        let handle = self.lock().await;
        let mut conn = handle.pool.acquire().await?;
        let rows = executor::fetch_rows(
            &mut conn,
            "introspect",
            "sqlite_master",
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            Vec::new(),
        )
        .await?;
        let names = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(names)
    }
}

pub(crate) async fn describe_table(
    conn: &mut SqliteConnection,
    table: &str,
) -> GraftResult<Option<SchemaTable>> {
    let sql = format!("PRAGMA table_info({})", table);
    let rows = executor::fetch_rows(conn, "introspect", table, &sql, Vec::new()).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let notnull: i64 = row.try_get("notnull")?;
        let pk: i64 = row.try_get("pk")?;
        columns.push(SchemaColumn {
            name: row.try_get("name")?,
            sql_type: row.try_get("type")?,
            nullable: pk == 0 && notnull == 0,
            primary_key: pk > 0,
        });
    }
    Ok(Some(SchemaTable {
        name: table.to_owned(),
        columns,
    }))
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> GraftResult<bool> {
    let ids = executor::fetch_ids(
        conn,
        "introspect",
        "sqlite_master",
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        vec![BindValue::from(table)],
    )
    .await?;
    Ok(ids.first().copied().unwrap_or(0) > 0)
}

/// Adds a nullable `INTEGER` foreign-key column unless it is already there.
async fn ensure_column(conn: &mut SqliteConnection, table: &str, column: &str) -> GraftResult<()> {
    let present = describe_table(conn, table)
        .await?
        .is_some_and(|schema| schema.column(column).is_some());
    if present {
        return Ok(());
    }
    let sql = format!("ALTER TABLE {} ADD COLUMN {} INTEGER", table, column);
    executor::execute(conn, "alter_table", table, &sql, Vec::new()).await?;
    tracing::info!(table, column, "graft added foreign key column");
    Ok(())
}
