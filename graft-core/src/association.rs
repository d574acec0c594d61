//! Per-call association bookkeeping.
//!
//! A [`Changeset`] is what the caller hands in (fields to reset, associations
//! to drop). A [`Bookkeeping`] is what the save and update engines build from
//! the record and the changeset while walking the graph. Both live for one
//! call and are dropped with it, so nothing carries over to the next cycle.

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::error::{GraftError, GraftResult};
use crate::model::Record;
use crate::relation::ForeignKey;
use crate::value::BindValue;

/// Caller-side instructions for a single save or update.
///
/// ```
/// use graft_core::Changeset;
///
/// let changes = Changeset::new().set_to_default("age").detach("classroom");
/// assert!(changes.is_detached("classroom"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    defaults: BTreeSet<String>,
    detached: BTreeSet<String>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `field` as its zero value on the next update even though
    /// zero values are normally skipped.
    pub fn set_to_default(mut self, field: impl Into<String>) -> Self {
        self.defaults.insert(field.into());
        self
    }

    /// Treats the association held in `field` as removed.
    pub fn detach(mut self, field: impl Into<String>) -> Self {
        self.detached.insert(field.into());
        self
    }

    pub fn is_detached(&self, field: &str) -> bool {
        self.detached.contains(field)
    }

    /// Rejects names the record cannot resolve.
    pub(crate) fn validate(&self, record: &dyn Record) -> GraftResult<()> {
        let columns = record.default_values();
        let collections = record.collection_values();
        for field in &self.defaults {
            let known = columns.iter().any(|(name, _)| *name == field.as_str())
                || collections
                    .iter()
                    .any(|(collection, _)| collection.field == field.as_str());
            if !known {
                return Err(GraftError::shape(format!(
                    "{} has no scalar column or collection named {}",
                    record.table(),
                    field
                )));
            }
        }
        let relations = record.associations();
        for field in &self.detached {
            if !relations.iter().any(|relation| relation.field == field.as_str()) {
                return Err(GraftError::shape(format!(
                    "{} has no association named {}",
                    record.table(),
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Ids that must end up in another table's foreign-key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteLinks {
    pub column: &'static str,
    pub ids: BTreeSet<i64>,
}

/// Rows to write into a join table for one many-to-many association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinLinks {
    pub join_table: String,
    pub local_column: &'static str,
    pub remote_column: &'static str,
    pub ids: SmallVec<[i64; 4]>,
}

/// Pending association work for exactly one save or update cycle.
#[derive(Debug, Default)]
pub(crate) struct Bookkeeping {
    /// Associated table -> rows whose foreign key must point at us.
    pub fk_by_other: BTreeMap<&'static str, RemoteLinks>,
    /// Associated table -> (our foreign-key column, associated row id).
    pub fk_by_self: BTreeMap<&'static str, (&'static str, i64)>,
    /// Join table -> ordered ids to pair with us there.
    pub join_table: BTreeMap<String, JoinLinks>,
    /// Our foreign-key columns that must be set to NULL.
    pub self_fk_to_clear: Vec<&'static str>,
    /// (table, column) pairs whose references to us must be cleared.
    pub associated_fk_to_clear: Vec<(&'static str, &'static str)>,
    /// Scalar columns to write as their default value.
    pub fields_to_default: BTreeSet<String>,
}

impl Bookkeeping {
    pub fn from_changeset(changes: &Changeset) -> Self {
        Self {
            fields_to_default: changes.defaults.clone(),
            ..Self::default()
        }
    }

    pub fn link_self(&mut self, table: &'static str, column: &'static str, id: i64) {
        self.fk_by_self.insert(table, (column, id));
    }

    pub fn link_other(&mut self, table: &'static str, column: &'static str, id: i64) {
        self.fk_by_other
            .entry(table)
            .or_insert_with(|| RemoteLinks {
                column,
                ids: BTreeSet::new(),
            })
            .ids
            .insert(id);
    }

    /// Registers a join association; called even when `ids` is empty so
    /// that stale join rows are dropped.
    pub fn link_join(&mut self, key: &ForeignKey, ids: &[i64]) {
        if let ForeignKey::Join {
            table: join_table,
            local_column,
            remote_column,
        } = key
        {
            let entry = self.join_table.entry(join_table.clone()).or_insert_with(|| JoinLinks {
                join_table: join_table.clone(),
                local_column: *local_column,
                remote_column: *remote_column,
                ids: SmallVec::new(),
            });
            for id in ids {
                if !entry.ids.contains(id) {
                    entry.ids.push(*id);
                }
            }
        }
    }

    pub fn clear_self(&mut self, column: &'static str) {
        if !self.self_fk_to_clear.contains(&column) {
            self.self_fk_to_clear.push(column);
        }
    }

    pub fn clear_other(&mut self, table: &'static str, column: &'static str) {
        if !self.associated_fk_to_clear.contains(&(table, column)) {
            self.associated_fk_to_clear.push((table, column));
        }
    }

    /// Values for our own row: scalars plus resolved or cleared foreign keys.
    pub fn own_row_values(&self, record: &dyn Record) -> Vec<(&'static str, BindValue)> {
        let mut values = scalar_values(record);
        for (column, id) in self.fk_by_self.values() {
            values.push((*column, BindValue::I64(*id)));
        }
        for column in &self.self_fk_to_clear {
            if !self.fk_by_self.values().any(|(linked, _)| linked == column) {
                values.push((*column, BindValue::Null));
            }
        }
        values
    }
}

/// Scalar columns of `record` minus any that collide with a foreign-key
/// column the record owns. Keys are only ever written from associations.
pub(crate) fn scalar_values(record: &dyn Record) -> Vec<(&'static str, BindValue)> {
    let owned: Vec<&'static str> = record
        .associations()
        .iter()
        .filter_map(|relation| match relation.key {
            ForeignKey::Local { column } => Some(column),
            _ => None,
        })
        .collect();
    let mut values = record.column_values();
    values.retain(|(column, _)| !owned.contains(column));
    values
}
