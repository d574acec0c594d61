//! Delete engine with cascade and foreign-key clearing.
//!
//! What happens to associated rows depends on who holds the key:
//! referencing rows are deleted or detached according to their
//! [`OnDelete`] policy, join rows are deleted, and rows we reference
//! ourselves are left alone.

use sqlx::SqliteConnection;

use crate::collection::{self, Collection};
use crate::conditions::Conditions;
use crate::database::{Graft, finish};
use crate::error::GraftResult;
use crate::executor::{self, CHUNK_SIZE, ensure_identifier, placeholders};
use crate::model::{Model, Record};
use crate::relation::{ForeignKey, OnDelete, Relation};
use crate::value::BindValue;

impl Graft {
    /// Deletes the row behind `model` and cascades to associated tables.
    ///
    /// Returns the number of rows removed, cascaded rows included. After a
    /// successful delete `model` and its cascade-deleted loaded instances
    /// are unsaved again.
    #[tracing::instrument(skip_all, fields(table = model.table(), id = model.id()))]
    pub async fn delete<M: Record>(&self, model: &mut M) -> GraftResult<u64> {
        if !model.is_saved() {
            return Ok(0);
        }
        let relations = model.associations();
        let collections: Vec<Collection> = model
            .collection_values()
            .into_iter()
            .map(|(collection, _)| collection)
            .collect();
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result = delete_rows(&mut tx, model.table(), &relations, &collections, &[model.id()]).await;
        let affected = finish(tx, "delete", result).await?;
        forget_deleted(model);
        Ok(affected)
    }

    #[tracing::instrument(skip(self), fields(table = M::table_name()))]
    pub async fn delete_by_id<M: Model>(&self, id: i64) -> GraftResult<u64> {
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result =
            delete_rows(&mut tx, M::table_name(), &M::relations(), &M::collections(), &[id]).await;
        finish(tx, "delete_by_id", result).await
    }

    /// Deletes every row of `M` matching `conditions`, cascading the same
    /// way [`Graft::delete`] does, in one transaction.
    #[tracing::instrument(skip_all, fields(table = M::table_name()))]
    pub async fn delete_all<M: Model>(&self, conditions: Conditions) -> GraftResult<u64> {
        conditions.validate()?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result = async {
            let mut sql = format!("SELECT id FROM {}", M::table_name());
            let mut binds = Vec::new();
            conditions.render_into(&mut sql, &mut binds, false);
            let ids = executor::fetch_ids(&mut tx, "select", M::table_name(), &sql, binds).await?;
            delete_rows(&mut tx, M::table_name(), &M::relations(), &M::collections(), &ids).await
        }
        .await;
        finish(tx, "delete_all", result).await
    }

    /// Deletes matching rows of a raw table.
    ///
    /// There is no model metadata here, so nothing cascades: associated
    /// rows and join rows are the caller's business.
    #[tracing::instrument(skip(self, conditions))]
    pub async fn delete_all_in_table(&self, table: &str, conditions: Conditions) -> GraftResult<u64> {
        ensure_identifier(table)?;
        conditions.validate()?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let mut sql = format!("DELETE FROM {}", table);
        let mut binds = Vec::new();
        conditions.render_into(&mut sql, &mut binds, false);
        let result = executor::execute(&mut tx, "delete", table, &sql, binds)
            .await
            .map(|done| done.rows_affected());
        finish(tx, "delete_all_in_table", result).await
    }
}

/// Deletes rows `ids` of `table` after handling every association.
///
/// Collection values go with their owners but are not counted.
pub(crate) async fn delete_rows(
    conn: &mut SqliteConnection,
    table: &str,
    relations: &[Relation],
    collections: &[Collection],
    ids: &[i64],
) -> GraftResult<u64> {
    let mut affected = 0;
    for chunk in ids.chunks(CHUNK_SIZE) {
        let marks = placeholders(chunk.len());
        let binds = || chunk.iter().map(|id| BindValue::I64(*id)).collect::<Vec<_>>();

        for collection in collections {
            collection::clear(conn, collection, chunk).await?;
        }

        for relation in relations {
            match &relation.key {
                ForeignKey::Local { .. } => {}
                ForeignKey::Remote {
                    column,
                    on_delete: OnDelete::Cascade,
                } => {
                    let sql = format!("DELETE FROM {} WHERE {} IN ({})", relation.table, column, marks);
                    let done = executor::execute(conn, "cascade", relation.table, &sql, binds()).await?;
                    affected += done.rows_affected();
                }
                ForeignKey::Remote {
                    column,
                    on_delete: OnDelete::SetNull,
                } => {
                    let sql = format!(
                        "UPDATE {} SET {} = NULL WHERE {} IN ({})",
                        relation.table, column, column, marks
                    );
                    executor::execute(conn, "clear_fk", relation.table, &sql, binds()).await?;
                }
                ForeignKey::Join {
                    table: join_table,
                    local_column,
                    remote_column,
                } => {
                    let done = if relation.table == table {
                        // Deleted rows can sit on either side of a self-referencing pair.
                        let sql = format!(
                            "DELETE FROM {} WHERE {} IN ({}) OR {} IN ({})",
                            join_table, local_column, marks, remote_column, marks
                        );
                        let mut both = binds();
                        both.extend(binds());
                        executor::execute(conn, "unlink_join", join_table, &sql, both).await?
                    } else {
                        let sql = format!("DELETE FROM {} WHERE {} IN ({})", join_table, local_column, marks);
                        executor::execute(conn, "unlink_join", join_table, &sql, binds()).await?
                    };
                    affected += done.rows_affected();
                }
            }
        }

        let sql = format!("DELETE FROM {} WHERE id IN ({})", table, marks);
        let done = executor::execute(conn, "delete", table, &sql, binds()).await?;
        affected += done.rows_affected();
    }
    Ok(affected)
}

/// Marks `record` and the loaded instances its delete cascaded to as unsaved.
fn forget_deleted(record: &mut dyn Record) {
    record.clear_saved_state();
    for relation in record.associations() {
        if !matches!(
            relation.key,
            ForeignKey::Remote {
                on_delete: OnDelete::Cascade,
                ..
            }
        ) {
            continue;
        }
        if let Some(mut children) = record.associated_mut(relation.field) {
            for child in children.iter_mut() {
                child.clear_saved_state();
            }
        }
    }
}
