//! One-level eager loading of associations.
//!
//! `#[derive(Model)]` generates an `eager_load` that dispatches on the
//! field name and calls into here. Each loader returns the associated
//! rows grouped by the id of the model that owns them.

use std::collections::HashMap;

use sqlx::{Row, SqliteConnection};

use crate::error::{GraftError, GraftResult};
use crate::executor::{self, CHUNK_SIZE, placeholders};
use crate::model::Model;
use crate::relation::{ForeignKey, Relation};
use crate::value::BindValue;

/// Extra column carrying the owner id of every loaded row.
const OWNER: &str = "__graft_owner";

/// Finds the declared relation behind `field`.
pub fn relation_for<M: Model>(field: &str) -> GraftResult<Relation> {
    M::relations()
        .into_iter()
        .find(|relation| relation.field == field)
        .ok_or_else(|| {
            GraftError::shape(format!("{} has no association named {}", M::table_name(), field))
        })
}

/// Loads the rows of `T` associated with each owner in `ids`.
pub async fn load_many<T: Model>(
    conn: &mut SqliteConnection,
    owner_table: &str,
    relation: &Relation,
    ids: &[i64],
) -> GraftResult<HashMap<i64, Vec<T>>> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut grouped: HashMap<i64, Vec<T>> = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(CHUNK_SIZE) {
        let sql = select_sql(owner_table, relation, chunk.len());
        let binds = chunk.iter().map(|id| BindValue::I64(*id)).collect();
        let rows = executor::fetch_rows(conn, "eager", relation.table, &sql, binds).await?;
        let mut owners = Vec::with_capacity(rows.len());
        let mut loaded = Vec::with_capacity(rows.len());
        for row in &rows {
            owners.push(row.try_get::<i64, _>(OWNER)?);
            loaded.push(T::from_row(row)?);
        }
        T::load_collections(&mut loaded, conn).await?;
        for (owner, model) in owners.into_iter().zip(loaded) {
            grouped.entry(owner).or_default().push(model);
        }
    }
    Ok(grouped)
}

/// Loads the single row of `T` associated with each owner in `ids`.
///
/// A `has_one` association that finds several rows for the same owner is
/// an [`GraftError::AmbiguousRow`].
pub async fn load_one<T: Model>(
    conn: &mut SqliteConnection,
    owner_table: &str,
    relation: &Relation,
    ids: &[i64],
) -> GraftResult<HashMap<i64, T>> {
    let grouped = load_many::<T>(conn, owner_table, relation, ids).await?;
    let mut single = HashMap::with_capacity(grouped.len());
    for (owner, mut rows) in grouped {
        if rows.len() > 1 {
            return Err(GraftError::AmbiguousRow {
                table: relation.table.to_owned(),
                matches: rows.len(),
            });
        }
        if let Some(row) = rows.pop() {
            single.insert(owner, row);
        }
    }
    Ok(single)
}

fn select_sql(owner_table: &str, relation: &Relation, count: usize) -> String {
    let marks = placeholders(count);
    match &relation.key {
        ForeignKey::Remote { column, .. } => format!(
            "SELECT *, {column} AS {OWNER} FROM {table} WHERE {column} IN ({marks})",
            table = relation.table,
        ),
        ForeignKey::Local { column } => format!(
            "SELECT o.*, s.id AS {OWNER} FROM {owner_table} s \
             JOIN {table} o ON o.id = s.{column} WHERE s.id IN ({marks})",
            table = relation.table,
        ),
        ForeignKey::Join {
            table: join_table,
            local_column,
            remote_column,
        } => format!(
            "SELECT o.*, j.{local_column} AS {OWNER} FROM {join_table} j \
             JOIN {table} o ON o.id = j.{remote_column} WHERE j.{local_column} IN ({marks})",
            table = relation.table,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::OnDelete;

    #[test]
    fn remote_rows_carry_their_foreign_key_as_owner() {
        let relation = Relation::has_many("students", "students", "classroom_id", OnDelete::Cascade);
        assert_eq!(
            select_sql("classrooms", &relation, 2),
            "SELECT *, classroom_id AS __graft_owner FROM students WHERE classroom_id IN (?, ?)"
        );
    }

    #[test]
    fn local_rows_join_through_the_owner_table() {
        let relation = Relation::belongs_to("classroom", "classrooms", "classroom_id");
        assert_eq!(
            select_sql("students", &relation, 1),
            "SELECT o.*, s.id AS __graft_owner FROM students s \
             JOIN classrooms o ON o.id = s.classroom_id WHERE s.id IN (?)"
        );
    }

    #[test]
    fn self_referencing_rows_join_on_the_partner_column() {
        let relation = Relation::self_many_to_many("friends", "persons", "person_id", "friends_id");
        assert_eq!(
            select_sql("persons", &relation, 1),
            "SELECT o.*, j.person_id AS __graft_owner FROM persons_friends j \
             JOIN persons o ON o.id = j.friends_id WHERE j.person_id IN (?)"
        );
    }

    #[test]
    fn join_rows_go_through_the_join_table() {
        let relation =
            Relation::many_to_many("teachers", "students", "student_id", "teachers", "teacher_id");
        assert_eq!(
            select_sql("students", &relation, 1),
            "SELECT o.*, j.student_id AS __graft_owner FROM students_teachers j \
             JOIN teachers o ON o.id = j.teacher_id WHERE j.student_id IN (?)"
        );
    }
}
