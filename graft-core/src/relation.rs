//! Association descriptors and the ownership rule.
//!
//! For every one-to-one or one-to-many pair exactly one table stores the
//! foreign key. A [`Relation`] is always described from the point of view
//! of the model that declares it, so the engines only ever ask "does my
//! table hold the key, does the other table, or does a join table".

use std::collections::BTreeSet;

use crate::error::{GraftError, GraftResult};
use crate::model::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToOne,
    /// Many-to-one seen from either side (`has_many` or `belongs_to`).
    ManyToOne,
    ManyToMany,
}

/// What happens to rows that reference a deleted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Delete the referencing rows.
    Cascade,
    /// Keep the referencing rows and clear their foreign key.
    SetNull,
}

/// Where the physical foreign key of an association lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignKey {
    /// This model's table stores `column`, pointing at the associated row.
    Local { column: &'static str },
    /// The associated table stores `column`, pointing back at this model.
    Remote {
        column: &'static str,
        on_delete: OnDelete,
    },
    /// Rows are paired through an intermediate table.
    Join {
        table: String,
        local_column: &'static str,
        remote_column: &'static str,
    },
}

/// One declared association of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Name of the struct field holding the associated instance(s).
    pub field: &'static str,
    pub kind: RelationKind,
    /// Table of the associated model.
    pub table: &'static str,
    pub key: ForeignKey,
}

impl Relation {
    pub fn belongs_to(field: &'static str, table: &'static str, column: &'static str) -> Self {
        Self {
            field,
            kind: RelationKind::ManyToOne,
            table,
            key: ForeignKey::Local { column },
        }
    }

    pub fn has_many(
        field: &'static str,
        table: &'static str,
        column: &'static str,
        on_delete: OnDelete,
    ) -> Self {
        Self {
            field,
            kind: RelationKind::ManyToOne,
            table,
            key: ForeignKey::Remote { column, on_delete },
        }
    }

    pub fn has_one(
        field: &'static str,
        table: &'static str,
        column: &'static str,
        on_delete: OnDelete,
    ) -> Self {
        Self {
            field,
            kind: RelationKind::OneToOne,
            table,
            key: ForeignKey::Remote { column, on_delete },
        }
    }

    pub fn many_to_many(
        field: &'static str,
        own_table: &'static str,
        own_key: &'static str,
        table: &'static str,
        their_key: &'static str,
    ) -> Self {
        Self {
            field,
            kind: RelationKind::ManyToMany,
            table,
            key: ForeignKey::Join {
                table: join_table_name(own_table, table),
                local_column: own_key,
                remote_column: their_key,
            },
        }
    }

    /// Many-to-many between rows of the same table.
    ///
    /// Both join columns would otherwise be `<model>_id`, so the partner
    /// side is named after the field (`friends_id`) and the join table
    /// after table and field (`persons_friends`).
    pub fn self_many_to_many(
        field: &'static str,
        table: &'static str,
        own_key: &'static str,
        partner_column: &'static str,
    ) -> Self {
        Self {
            field,
            kind: RelationKind::ManyToMany,
            table,
            key: ForeignKey::Join {
                table: format!("{}_{}", table, field),
                local_column: own_key,
                remote_column: partner_column,
            },
        }
    }

    /// Whether the declaring model's own table stores the key.
    pub fn holds_foreign_key(&self) -> bool {
        matches!(self.key, ForeignKey::Local { .. })
    }

    /// Whether the association holds at most one instance.
    pub fn is_to_one(&self) -> bool {
        match self.key {
            ForeignKey::Local { .. } => true,
            ForeignKey::Remote { .. } => self.kind == RelationKind::OneToOne,
            ForeignKey::Join { .. } => false,
        }
    }
}

/// Rejects associations that would share one physical key.
///
/// Two `belongs_to` fields pointing at the same model would both write
/// `<model>_id` on `table`, two `has_many`/`has_one` fields for the same
/// model would both write our key on the other table, and two
/// many-to-many fields would share one join table. In each case one link
/// silently overwrites the other, so the shape is refused up front.
pub(crate) fn check_relations(table: &str, relations: &[Relation]) -> GraftResult<()> {
    let mut seen: BTreeSet<(u8, String, &'static str)> = BTreeSet::new();
    for relation in relations {
        let slot = match &relation.key {
            ForeignKey::Local { column } => (0, table.to_owned(), *column),
            ForeignKey::Remote { column, .. } => (1, relation.table.to_owned(), *column),
            ForeignKey::Join {
                table: join_table,
                local_column,
                ..
            } => (2, join_table.clone(), *local_column),
        };
        if !seen.insert(slot) {
            return Err(GraftError::shape(format!(
                "{}.{} shares its foreign key with another association of {}",
                table, relation.field, table
            )));
        }
    }
    Ok(())
}

/// Intermediate table for a many-to-many pair: both names sorted, joined by `_`.
pub fn join_table_name(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// Field storage for a to-one association (`Option<T>` or `Option<Box<T>>`).
pub trait ToOne<T> {
    fn get(&self) -> Option<&T>;
    fn get_mut(&mut self) -> Option<&mut T>;
    fn put(&mut self, value: Option<T>);
}

impl<T> ToOne<T> for Option<T> {
    fn get(&self) -> Option<&T> {
        self.as_ref()
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        self.as_mut()
    }

    fn put(&mut self, value: Option<T>) {
        *self = value;
    }
}

impl<T> ToOne<T> for Option<Box<T>> {
    fn get(&self) -> Option<&T> {
        self.as_deref()
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        self.as_deref_mut()
    }

    fn put(&mut self, value: Option<T>) {
        *self = value.map(Box::new);
    }
}

/// Live instances of a to-one field as records, `None` when the field is unset.
pub fn to_one_records<'a, T, S>(slot: &'a mut S) -> Option<Vec<&'a mut dyn Record>>
where
    T: Record + 'a,
    S: ToOne<T>,
{
    slot.get_mut().map(|value| vec![value as &mut dyn Record])
}

/// Live instances of a to-many field as records, `None` when the field is unloaded.
pub fn to_many_records<T>(slot: &mut Option<Vec<T>>) -> Option<Vec<&mut dyn Record>>
where
    T: Record,
{
    slot.as_mut()
        .map(|values| values.iter_mut().map(|v| v as &mut dyn Record).collect())
}
