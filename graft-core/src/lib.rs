//! Association-aware persistence engine for SQLite.
//!
//! Models are plain structs implementing [`Model`] (normally through
//! `#[derive(Model)]` in `graft-orm`). A [`Graft`] handle saves, updates,
//! deletes and queries them, walking their associations inside a single
//! transaction per call.

pub use sqlx;

mod association;
pub mod collection;
mod conditions;
mod config;
mod database;
mod delete;
pub mod eager;
mod error;
mod executor;
pub mod metrics;
mod model;
mod query;
mod relation;
mod save;
mod schema;
#[cfg(test)]
mod send_test;
pub mod test_utils;
mod update;
mod value;

pub use association::Changeset;
pub use collection::Collection;
pub use conditions::Conditions;
pub use config::{DEFAULT_URL, GraftConfig};
pub use database::Graft;
pub use error::{GraftError, GraftResult};
pub use model::{Model, Record, mark_as_deleted};
pub use query::QueryBuilder;
pub use relation::{
    ForeignKey, OnDelete, Relation, RelationKind, ToOne, join_table_name, to_many_records,
    to_one_records,
};
pub use schema::{SchemaColumn, SchemaTable};
pub use value::BindValue;

/// Items the derive macro expands to. Not a stable API.
#[doc(hidden)]
pub mod __private {
    pub use futures_util::future::BoxFuture;

    use sqlx::sqlite::SqliteRow;
    use sqlx::{Decode, Row, Sqlite, Type};

    /// Reads `name` from `row`; a column missing from the result set (a
    /// narrowed `select`) yields the field's default.
    pub fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, sqlx::Error>
    where
        T: Decode<'r, Sqlite> + Type<Sqlite> + Default,
    {
        match row.try_get(name) {
            Ok(value) => Ok(value),
            Err(sqlx::Error::ColumnNotFound(_)) => Ok(T::default()),
            Err(err) => Err(err),
        }
    }
}

pub mod prelude {
    pub use crate::{
        BindValue, Changeset, Conditions, Graft, GraftConfig, GraftError, GraftResult, Model,
        OnDelete, Record, mark_as_deleted,
    };
}
