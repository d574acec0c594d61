//! Update engine: writes scalar columns of existing rows.
//!
//! Foreign-key columns are never part of an update. Associations are only
//! rewired by the save and delete engines.

use sqlx::SqliteConnection;

use crate::association::{Bookkeeping, Changeset, scalar_values};
use crate::collection::{self, Collection};
use crate::conditions::Conditions;
use crate::database::{Graft, finish};
use crate::error::{GraftError, GraftResult};
use crate::executor::{self, ensure_identifier};
use crate::model::{Model, Record};
use crate::relation::ForeignKey;
use crate::value::BindValue;

impl Graft {
    /// Writes the non-default fields of `model` into row `id`.
    pub async fn update<M: Record>(&self, model: &M, id: i64) -> GraftResult<u64> {
        self.update_with(model, id, Changeset::default()).await
    }

    /// [`Graft::update`] that also resets the fields named in `changes`.
    ///
    /// Non-empty collection fields replace the stored values of row `id`;
    /// collections named in `changes` are emptied. The returned count is
    /// the number of owner rows written.
    #[tracing::instrument(skip(self, model, changes), fields(table = model.table()))]
    pub async fn update_with<M: Record>(&self, model: &M, id: i64, changes: Changeset) -> GraftResult<u64> {
        changes.validate(model)?;
        let book = Bookkeeping::from_changeset(&changes);
        let values = changed_values(model, &book);
        let collections = changed_collections(model, &book);
        if values.is_empty() && collections.is_empty() {
            return Ok(0);
        }
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result = async {
            let affected = update_row(&mut tx, model.table(), id, values).await?;
            for (collection, items) in &collections {
                collection::replace(&mut tx, collection, id, items).await?;
            }
            Ok(affected)
        }
        .await;
        finish(tx, "update", result).await
    }

    /// Writes the non-default fields of `model` into every row matching `conditions`.
    pub async fn update_all<M: Record>(&self, model: &M, conditions: Conditions) -> GraftResult<u64> {
        self.update_all_with(model, conditions, Changeset::default()).await
    }

    #[tracing::instrument(skip_all, fields(table = model.table()))]
    pub async fn update_all_with<M: Record>(
        &self,
        model: &M,
        conditions: Conditions,
        changes: Changeset,
    ) -> GraftResult<u64> {
        conditions.validate()?;
        changes.validate(model)?;
        let book = Bookkeeping::from_changeset(&changes);
        let values = changed_values(model, &book);
        let collections = changed_collections(model, &book);
        if values.is_empty() && collections.is_empty() {
            return Ok(0);
        }
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let table = model.table();
        let result = async {
            if !collections.is_empty() {
                let mut sql = format!("SELECT id FROM {}", table);
                let mut binds = Vec::new();
                conditions.render_into(&mut sql, &mut binds, false);
                let ids = executor::fetch_ids(&mut tx, "select", table, &sql, binds).await?;
                for id in ids {
                    for (collection, items) in &collections {
                        collection::replace(&mut tx, collection, id, items).await?;
                    }
                }
            }
            update_where(&mut tx, table, values, &conditions).await
        }
        .await;
        finish(tx, "update_all", result).await
    }

    /// Writes explicit column values into row `id` of `M`'s table.
    ///
    /// `values` must be a JSON object whose keys are scalar columns of `M`.
    pub async fn update_values<M: Model>(&self, values: serde_json::Value, id: i64) -> GraftResult<u64> {
        self.update_all_values::<M>(values, Conditions::new("id = ?").arg(id))
            .await
    }

    #[tracing::instrument(skip(self, values), fields(table = M::table_name()))]
    pub async fn update_all_values<M: Model>(
        &self,
        values: serde_json::Value,
        conditions: Conditions,
    ) -> GraftResult<u64> {
        conditions.validate()?;
        let columns = M::list_columns();
        let keys: Vec<&'static str> = M::relations()
            .iter()
            .filter_map(|relation| match relation.key {
                ForeignKey::Local { column } => Some(column),
                _ => None,
            })
            .collect();
        let values = json_values(&values, |key| {
            if keys.iter().any(|column| *column == key) {
                Err(GraftError::shape(format!(
                    "{}.{} is a foreign key and only changes through associations",
                    M::table_name(),
                    key
                )))
            } else if key != "id" && columns.iter().any(|column| *column == key) {
                Ok(())
            } else {
                Err(GraftError::shape(format!(
                    "{} has no scalar column named {}",
                    M::table_name(),
                    key
                )))
            }
        })?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result = update_where(&mut tx, M::table_name(), values, &conditions).await;
        finish(tx, "update_all_values", result).await
    }

    /// Raw-table variant without model metadata; any identifier is accepted.
    #[tracing::instrument(skip(self, values))]
    pub async fn update_table_values(
        &self,
        table: &str,
        values: serde_json::Value,
        conditions: Conditions,
    ) -> GraftResult<u64> {
        ensure_identifier(table)?;
        conditions.validate()?;
        let values = json_values(&values, ensure_identifier)?;
        let handle = self.lock().await;
        let mut tx = handle.pool.begin().await?;
        let result = update_where(&mut tx, table, values, &conditions).await;
        finish(tx, "update_table_values", result).await
    }
}

/// Scalar columns to write: set fields, plus fields marked for reset.
/// Columns the record uses as foreign keys are never part of the result.
fn changed_values(record: &dyn Record, book: &Bookkeeping) -> Vec<(String, BindValue)> {
    let defaults = record.default_values();
    let mut values = Vec::new();
    for (column, value) in scalar_values(record) {
        if !value.is_default() {
            values.push((column.to_owned(), value));
        } else if book.fields_to_default.contains(column) {
            let reset = defaults
                .iter()
                .find(|(name, _)| *name == column)
                .map(|(_, value)| value.clone())
                .unwrap_or(BindValue::Null);
            values.push((column.to_owned(), reset));
        }
    }
    values
}

/// Collections to rewrite: non-empty ones, plus empty ones marked for reset.
fn changed_collections(record: &dyn Record, book: &Bookkeeping) -> Vec<(Collection, Vec<BindValue>)> {
    record
        .collection_values()
        .into_iter()
        .filter(|(collection, items)| {
            !items.is_empty() || book.fields_to_default.contains(collection.field)
        })
        .collect()
}

fn json_values<F>(values: &serde_json::Value, mut check: F) -> GraftResult<Vec<(String, BindValue)>>
where
    F: FnMut(&str) -> GraftResult<()>,
{
    let object = values
        .as_object()
        .ok_or_else(|| GraftError::shape("column values must be a JSON object"))?;
    let mut out = Vec::with_capacity(object.len());
    for (key, value) in object {
        check(key.as_str())?;
        out.push((key.clone(), BindValue::from_json(value)?));
    }
    Ok(out)
}

/// `UPDATE <table> SET ... WHERE id = ?`; no statement when `values` is empty.
pub(crate) async fn update_row<C: AsRef<str>>(
    conn: &mut SqliteConnection,
    table: &str,
    id: i64,
    values: Vec<(C, BindValue)>,
) -> GraftResult<u64> {
    update_where(conn, table, values, &Conditions::new("id = ?").arg(id)).await
}

async fn update_where<C: AsRef<str>>(
    conn: &mut SqliteConnection,
    table: &str,
    values: Vec<(C, BindValue)>,
    conditions: &Conditions,
) -> GraftResult<u64> {
    if values.is_empty() {
        return Ok(0);
    }
    let assignments: Vec<String> = values
        .iter()
        .map(|(column, _)| format!("{} = ?", column.as_ref()))
        .collect();
    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    let mut binds: Vec<BindValue> = values.into_iter().map(|(_, value)| value).collect();
    conditions.render_into(&mut sql, &mut binds, false);
    let result = executor::execute(conn, "update", table, &sql, binds).await?;
    Ok(result.rows_affected())
}
