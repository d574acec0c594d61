//! Save engine: persists a record and its directly associated instances.

use std::collections::BTreeSet;

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;

use crate::association::{Bookkeeping, Changeset};
use crate::collection;
use crate::conditions::Conditions;
use crate::database::{Graft, finish};
use crate::error::GraftResult;
use crate::executor::{self, CHUNK_SIZE, placeholders};
use crate::model::{Model, Record};
use crate::relation::{ForeignKey, RelationKind, check_relations};
use crate::update::update_row;
use crate::value::BindValue;

impl Graft {
    /// Inserts or updates `model` together with its loaded associations.
    pub async fn save<M: Record>(&self, model: &mut M) -> GraftResult<()> {
        self.save_with(model, Changeset::default()).await
    }

    /// [`Graft::save`] with detached associations.
    #[tracing::instrument(skip_all, fields(table = model.table()))]
    pub async fn save_with<M: Record>(&self, model: &mut M, changes: Changeset) -> GraftResult<()> {
        changes.validate(&*model)?;
        check_graph(&mut *model)?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let snapshot = SavedIds::capture(&mut *model);
        let result = save_record(&mut tx, &mut *model, &changes).await;
        if result.is_err() {
            snapshot.restore(&mut *model);
        }
        finish(tx, "save", result).await
    }

    /// Same as [`Graft::save`] but reports failure as `false`.
    pub async fn save_quiet<M: Record>(&self, model: &mut M) -> bool {
        match self.save(model).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(table = model.table(), error = %err, "graft save failed");
                false
            }
        }
    }

    /// Saves every model in one transaction: all are stored or none is.
    #[tracing::instrument(skip_all, fields(count = models.len()))]
    pub async fn save_all<M: Record>(&self, models: &mut [M]) -> GraftResult<()> {
        for model in models.iter_mut() {
            check_graph(model)?;
        }
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let snapshots: Vec<SavedIds> = models.iter_mut().map(|m| SavedIds::capture(m)).collect();
        let changes = Changeset::default();
        let mut result = Ok(());
        for model in models.iter_mut() {
            result = save_record(&mut tx, model, &changes).await;
            if result.is_err() {
                break;
            }
        }
        if result.is_err() {
            for (model, snapshot) in models.iter_mut().zip(&snapshots) {
                snapshot.restore(model);
            }
        }
        finish(tx, "save_all", result).await
    }

    pub async fn save_all_quiet<M: Record>(&self, models: &mut [M]) -> bool {
        match self.save_all(models).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "graft save_all failed");
                false
            }
        }
    }

    /// Updates every row matching `conditions` with the values of `model`,
    /// or inserts `model` when nothing matches.
    #[tracing::instrument(skip_all, fields(table = M::table_name()))]
    pub async fn save_or_update<M: Model>(&self, model: &mut M, conditions: Conditions) -> GraftResult<()> {
        conditions.validate()?;
        if conditions.is_empty() {
            return self.save(model).await;
        }
        check_graph(&mut *model)?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let original_id = model.id();
        let snapshot = SavedIds::capture(&mut *model);
        let changes = Changeset::default();

        let result = async {
            let mut sql = format!("SELECT id FROM {}", M::table_name());
            let mut binds = Vec::new();
            conditions.render_into(&mut sql, &mut binds, false);
            let ids = executor::fetch_ids(&mut tx, "select", M::table_name(), &sql, binds).await?;
            if ids.is_empty() {
                return save_record(&mut tx, &mut *model, &changes).await;
            }
            for id in ids {
                model.set_id(id);
                save_record(&mut tx, &mut *model, &changes).await?;
            }
            Ok(())
        }
        .await;

        if result.is_err() {
            snapshot.restore(&mut *model);
            model.set_id(original_id);
        }
        finish(tx, "save_or_update", result).await
    }

    pub async fn save_or_update_quiet<M: Model>(&self, model: &mut M, conditions: Conditions) -> bool {
        match self.save_or_update(model, conditions).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(table = M::table_name(), error = %err, "graft save_or_update failed");
                false
            }
        }
    }
}

/// Saves one record inside the caller's transaction.
///
/// Rows referenced by our own foreign keys are saved first, then our row,
/// then rows that reference us and join-table pairs. Associated instances
/// that are already saved are linked, not rewritten.
pub(crate) fn save_record<'a>(
    conn: &'a mut SqliteConnection,
    record: &'a mut dyn Record,
    changes: &'a Changeset,
) -> BoxFuture<'a, GraftResult<()>> {
    Box::pin(async move {
        let table = record.table();
        let relations = record.associations();
        let was_saved = record.is_saved();
        let mut book = Bookkeeping::from_changeset(changes);
        let nested = Changeset::default();

        for relation in &relations {
            let ForeignKey::Local { column } = &relation.key else {
                continue;
            };
            if changes.is_detached(relation.field) {
                if was_saved {
                    book.clear_self(*column);
                }
                continue;
            }
            let Some(mut linked) = record.associated_mut(relation.field) else {
                continue;
            };
            if let Some(parent) = linked.first_mut() {
                if !parent.is_saved() {
                    save_record(&mut *conn, &mut **parent, &nested).await?;
                }
                book.link_self(relation.table, *column, parent.id());
            }
        }

        let values = book.own_row_values(&*record);
        if was_saved {
            let affected = update_row(&mut *conn, table, record.id(), values).await?;
            if affected == 0 {
                tracing::debug!(table, id = record.id(), "graft save matched no row");
            }
        } else {
            let id = insert_row(&mut *conn, table, values).await?;
            record.set_id(id);
        }
        let id = record.id();

        for (collection, values) in record.collection_values() {
            collection::replace(&mut *conn, &collection, id, &values).await?;
        }

        for relation in &relations {
            match &relation.key {
                ForeignKey::Local { .. } => {}
                ForeignKey::Remote { column, .. } => {
                    if changes.is_detached(relation.field) {
                        if was_saved {
                            book.clear_other(relation.table, *column);
                        }
                        continue;
                    }
                    let Some(mut children) = record.associated_mut(relation.field) else {
                        continue;
                    };
                    // A one-to-one owner keeps a single referencing row.
                    if was_saved && (children.is_empty() || relation.kind == RelationKind::OneToOne) {
                        book.clear_other(relation.table, *column);
                    }
                    for child in children.iter_mut() {
                        if !child.is_saved() {
                            save_record(&mut *conn, &mut **child, &nested).await?;
                        }
                        book.link_other(relation.table, *column, child.id());
                    }
                }
                ForeignKey::Join { .. } => {
                    if changes.is_detached(relation.field) {
                        book.link_join(&relation.key, &[]);
                        continue;
                    }
                    let Some(mut others) = record.associated_mut(relation.field) else {
                        continue;
                    };
                    let mut ids = Vec::with_capacity(others.len());
                    for other in others.iter_mut() {
                        if !other.is_saved() {
                            save_record(&mut *conn, &mut **other, &nested).await?;
                        }
                        ids.push(other.id());
                    }
                    book.link_join(&relation.key, &ids);
                }
            }
        }

        apply_links(conn, id, &book).await
    })
}

async fn insert_row(
    conn: &mut SqliteConnection,
    table: &'static str,
    values: Vec<(&'static str, BindValue)>,
) -> GraftResult<i64> {
    let sql = if values.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table)
    } else {
        let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders(columns.len())
        )
    };
    let binds = values.into_iter().map(|(_, value)| value).collect();
    let result = executor::execute(conn, "insert", table, &sql, binds).await?;
    Ok(result.last_insert_rowid())
}

/// Writes the foreign keys and join rows collected for the record `id`.
async fn apply_links(conn: &mut SqliteConnection, id: i64, book: &Bookkeeping) -> GraftResult<()> {
    for (table, column) in &book.associated_fk_to_clear {
        let sql = format!("UPDATE {} SET {} = NULL WHERE {} = ?", table, column, column);
        executor::execute(conn, "clear_fk", table, &sql, vec![BindValue::I64(id)]).await?;
    }

    for (table, links) in &book.fk_by_other {
        let ids: Vec<i64> = links.ids.iter().copied().collect();
        for chunk in ids.chunks(CHUNK_SIZE) {
            let sql = format!(
                "UPDATE {} SET {} = ? WHERE id IN ({})",
                table,
                links.column,
                placeholders(chunk.len())
            );
            let mut binds = Vec::with_capacity(chunk.len() + 1);
            binds.push(BindValue::I64(id));
            binds.extend(chunk.iter().map(|other| BindValue::I64(*other)));
            executor::execute(conn, "link_fk", table, &sql, binds).await?;
        }
    }

    for links in book.join_table.values() {
        let sql = format!("DELETE FROM {} WHERE {} = ?", links.join_table, links.local_column);
        executor::execute(conn, "unlink_join", &links.join_table, &sql, vec![BindValue::I64(id)])
            .await?;
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            links.join_table, links.local_column, links.remote_column
        );
        for other in &links.ids {
            executor::execute(
                conn,
                "link_join",
                &links.join_table,
                &sql,
                vec![BindValue::I64(id), BindValue::I64(*other)],
            )
            .await?;
        }
    }
    Ok(())
}

/// Rejects a graph whose records declare associations sharing one key,
/// before any statement runs.
fn check_graph(record: &mut dyn Record) -> GraftResult<()> {
    let relations = record.associations();
    check_relations(record.table(), &relations)?;
    for relation in &relations {
        if let Some(mut associated) = record.associated_mut(relation.field) {
            for other in associated.iter_mut() {
                check_relations(other.table(), &other.associations())?;
            }
        }
    }
    Ok(())
}

/// Saved `(table, id)` pairs of a graph before a save attempt.
///
/// When the transaction rolls back, ids handed out during the attempt are
/// reset so the in-memory graph matches the database again.
struct SavedIds(BTreeSet<(&'static str, i64)>);

impl SavedIds {
    fn capture(record: &mut dyn Record) -> Self {
        let mut ids = BTreeSet::new();
        collect_saved(record, &mut ids);
        Self(ids)
    }

    fn restore(&self, record: &mut dyn Record) {
        if record.is_saved() && !self.0.contains(&(record.table(), record.id())) {
            record.clear_saved_state();
        }
        for relation in record.associations() {
            if let Some(mut associated) = record.associated_mut(relation.field) {
                for other in associated.iter_mut() {
                    self.restore(&mut **other);
                }
            }
        }
    }
}

fn collect_saved(record: &mut dyn Record, ids: &mut BTreeSet<(&'static str, i64)>) {
    if record.is_saved() {
        ids.insert((record.table(), record.id()));
    }
    for relation in record.associations() {
        if let Some(mut associated) = record.associated_mut(relation.field) {
            for other in associated.iter_mut() {
                collect_saved(&mut **other, ids);
            }
        }
    }
}
