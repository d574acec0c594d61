use std::future::Future;

use futures_util::future::BoxFuture;
use sqlx::SqliteConnection;
use sqlx::sqlite::SqliteRow;

use crate::association::Changeset;
use crate::collection::Collection;
use crate::conditions::Conditions;
use crate::database::Graft;
use crate::error::GraftResult;
use crate::query::QueryBuilder;
use crate::relation::Relation;
use crate::value::BindValue;

/// Object-safe view of a persisted model.
///
/// The save and delete engines walk association graphs through
/// `&mut dyn Record`, so every method here must stay dyn-compatible.
/// Implementations are generated by `#[derive(Model)]`.
pub trait Record: Send + Sync {
    /// Table backing this record.
    fn table(&self) -> &'static str;

    /// Row id, `0` while the record has never been saved.
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    /// Scalar columns and their current values, `id` and foreign keys excluded.
    fn column_values(&self) -> Vec<(&'static str, BindValue)>;

    /// Scalar columns and the values of a freshly defaulted instance.
    fn default_values(&self) -> Vec<(&'static str, BindValue)>;

    fn associations(&self) -> Vec<Relation>;

    /// Collection fields and their current values.
    fn collection_values(&self) -> Vec<(Collection, Vec<BindValue>)> {
        Vec::new()
    }

    /// Live associated instances held in `field`.
    ///
    /// `None` means the field is not loaded and must be left alone; an
    /// empty vector means the association was removed.
    fn associated_mut(&mut self, field: &str) -> Option<Vec<&mut dyn Record>>;

    fn is_saved(&self) -> bool {
        self.id() > 0
    }

    /// Forgets the row id so the next save inserts a fresh row.
    fn clear_saved_state(&mut self) {
        self.set_id(0);
    }
}

/// Static side of a model: table metadata, hydration and eager loading.
pub trait Model: Record + Default + Sized + Unpin + for<'r> sqlx::FromRow<'r, SqliteRow> + 'static {
    fn table_name() -> &'static str;

    /// Column other tables use to reference this model (`<name>_id`).
    fn foreign_key() -> &'static str;

    /// `CREATE TABLE IF NOT EXISTS` for the scalar columns.
    fn create_table_sql() -> String;

    /// All scalar columns including `id`.
    fn list_columns() -> Vec<&'static str>;

    fn relations() -> Vec<Relation>;

    /// Tables backing the collection fields.
    fn collections() -> Vec<Collection> {
        Vec::new()
    }

    /// Fills the collection fields of every saved model in `models`.
    fn load_collections<'c>(
        _models: &'c mut [Self],
        _conn: &'c mut SqliteConnection,
    ) -> BoxFuture<'c, GraftResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Loads one association level for every model in `models`.
    fn eager_load<'c>(
        models: &'c mut [Self],
        field: &'c str,
        conn: &'c mut SqliteConnection,
    ) -> BoxFuture<'c, GraftResult<()>>;

    fn save<'a>(&'a mut self, db: &'a Graft) -> impl Future<Output = GraftResult<()>> + Send + 'a {
        db.save(self)
    }

    fn save_with<'a>(
        &'a mut self,
        db: &'a Graft,
        changes: Changeset,
    ) -> impl Future<Output = GraftResult<()>> + Send + 'a {
        db.save_with(self, changes)
    }

    fn update<'a>(&'a self, db: &'a Graft, id: i64) -> impl Future<Output = GraftResult<u64>> + Send + 'a {
        db.update(self, id)
    }

    fn update_all<'a>(
        &'a self,
        db: &'a Graft,
        conditions: Conditions,
    ) -> impl Future<Output = GraftResult<u64>> + Send + 'a {
        db.update_all(self, conditions)
    }

    fn delete<'a>(&'a mut self, db: &'a Graft) -> impl Future<Output = GraftResult<u64>> + Send + 'a {
        db.delete(self)
    }

    fn find<'a>(db: &'a Graft, id: i64) -> impl Future<Output = GraftResult<Option<Self>>> + Send + 'a {
        db.find::<Self>(id)
    }

    fn query(db: &Graft) -> QueryBuilder<'_, Self> {
        QueryBuilder::new(db)
    }
}

/// Resets the row id of every instance without touching the database.
pub fn mark_as_deleted<M: Record>(models: &mut [M]) {
    for model in models {
        model.clear_saved_state();
    }
}
