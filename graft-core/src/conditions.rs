use crate::error::{GraftError, GraftResult};
use crate::value::BindValue;

/// A `WHERE` clause with positional `?` placeholders and its arguments.
///
/// ```
/// use graft_core::Conditions;
///
/// let conditions = Conditions::new("name = ? AND age > ?").arg("Tom").arg(14);
/// assert!(conditions.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    clause: String,
    args: Vec<BindValue>,
}

impl Conditions {
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            args: Vec::new(),
        }
    }

    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<BindValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<BindValue>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn clause(&self) -> &str {
        &self.clause
    }

    pub fn arguments(&self) -> &[BindValue] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.clause.trim().is_empty() && self.args.is_empty()
    }

    /// Checks that every `?` has exactly one argument.
    ///
    /// Runs before any statement is prepared so a mismatch never reaches
    /// the database.
    pub fn validate(&self) -> GraftResult<()> {
        let placeholders = count_placeholders(&self.clause);
        if placeholders != self.args.len() {
            return Err(GraftError::MalformedConditions {
                placeholders,
                arguments: self.args.len(),
            });
        }
        Ok(())
    }

    /// Appends ` WHERE <clause>` (or ` AND (<clause>)` when `has_where`)
    /// and the arguments to `binds`.
    pub(crate) fn render_into(&self, sql: &mut String, binds: &mut Vec<BindValue>, has_where: bool) {
        if self.clause.trim().is_empty() {
            return;
        }
        if has_where {
            sql.push_str(" AND (");
        } else {
            sql.push_str(" WHERE (");
        }
        sql.push_str(&self.clause);
        sql.push(')');
        binds.extend(self.args.iter().cloned());
    }

    pub(crate) fn and(mut self, other: Conditions) -> Self {
        if other.clause.trim().is_empty() {
            return self;
        }
        if self.clause.trim().is_empty() {
            return other;
        }
        self.clause = format!("({}) AND ({})", self.clause, other.clause);
        self.args.extend(other.args);
        self
    }
}

/// Counts `?` outside single-quoted string literals.
fn count_placeholders(clause: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for ch in clause.chars() {
        match ch {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matching_counts_validate() {
        let conditions = Conditions::new("name = ? AND age > ?").arg("Tom").arg(14);
        assert!(conditions.validate().is_ok());
    }

    #[test]
    fn missing_argument_is_rejected() {
        let err = Conditions::new("name = ? AND age > ?")
            .arg("Tom")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            GraftError::MalformedConditions {
                placeholders: 2,
                arguments: 1
            }
        ));
    }

    #[test]
    fn extra_argument_is_rejected() {
        let err = Conditions::all().arg(1).validate().unwrap_err();
        assert!(matches!(err, GraftError::MalformedConditions { .. }));
    }

    #[test]
    fn quoted_question_marks_are_not_placeholders() {
        let conditions = Conditions::new("title = 'why?' AND id = ?").arg(3);
        assert!(conditions.validate().is_ok());
    }

    #[test]
    fn render_wraps_clause() {
        let mut sql = "SELECT * FROM students".to_owned();
        let mut binds = Vec::new();
        Conditions::new("age > ?")
            .arg(10)
            .render_into(&mut sql, &mut binds, false);
        assert_eq!(sql, "SELECT * FROM students WHERE (age > ?)");
        assert_eq!(binds, vec![BindValue::I64(10)]);
    }

    #[test]
    fn and_combines_clauses_in_order() {
        let combined = Conditions::new("a = ?")
            .arg(1)
            .and(Conditions::new("b = ?").arg(2));
        assert_eq!(combined.clause(), "(a = ?) AND (b = ?)");
        assert_eq!(combined.arguments(), &[BindValue::I64(1), BindValue::I64(2)]);
        assert!(combined.validate().is_ok());
    }

    proptest! {
        #[test]
        fn validate_accepts_iff_counts_match(placeholders in 0usize..8, arguments in 0usize..8) {
            let clause = vec!["c = ?"; placeholders].join(" AND ");
            let conditions = Conditions::new(clause).args((0..arguments).map(|i| i as i64));
            prop_assert_eq!(conditions.validate().is_ok(), placeholders == arguments);
        }
    }
}
