use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::Sqlite;
use sqlx::sqlite::SqliteArguments;

use crate::error::{GraftError, GraftResult};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A column value in transit between a model and a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    String(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Blob(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    Null,
}

impl BindValue {
    /// Whether the value equals the zero value of its Rust type.
    ///
    /// Update statements skip such columns unless the caller asked for
    /// them to be reset explicitly.
    pub fn is_default(&self) -> bool {
        match self {
            BindValue::String(v) => v.is_empty(),
            BindValue::I64(v) => *v == 0,
            BindValue::F64(v) => *v == 0.0,
            BindValue::Bool(v) => !*v,
            BindValue::Blob(v) => v.is_empty(),
            BindValue::Uuid(v) => v.is_nil(),
            BindValue::DateTime(v) => *v == DateTime::<Utc>::default(),
            BindValue::NaiveDateTime(v) => *v == NaiveDateTime::default(),
            BindValue::Null => true,
        }
    }

    pub(crate) fn to_log_string(&self) -> String {
        match self {
            BindValue::String(v) => v.clone(),
            BindValue::I64(v) => v.to_string(),
            BindValue::F64(v) => v.to_string(),
            BindValue::Bool(v) => v.to_string(),
            BindValue::Blob(v) => format!("<{} bytes>", v.len()),
            BindValue::Uuid(v) => v.to_string(),
            BindValue::DateTime(v) => v.to_rfc3339(),
            BindValue::NaiveDateTime(v) => v.to_string(),
            BindValue::Null => "NULL".to_owned(),
        }
    }

    /// Converts a scalar JSON value; arrays and objects have no column form.
    pub fn from_json(value: &serde_json::Value) -> GraftResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(BindValue::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(BindValue::I64(v))
                } else if let Some(v) = n.as_f64() {
                    Ok(BindValue::F64(v))
                } else {
                    Err(GraftError::shape(format!("number {} does not fit a column", n)))
                }
            }
            serde_json::Value::Bool(b) => Ok(BindValue::Bool(*b)),
            serde_json::Value::Null => Ok(BindValue::Null),
            other => Err(GraftError::shape(format!(
                "unsupported column value {}",
                other
            ))),
        }
    }
}

/// Binds a value onto a sqlite query.
pub(crate) fn bind_value(query: SqliteQuery<'_>, value: BindValue) -> SqliteQuery<'_> {
    match value {
        BindValue::String(v) => query.bind(v),
        BindValue::I64(v) => query.bind(v),
        BindValue::F64(v) => query.bind(v),
        BindValue::Bool(v) => query.bind(v),
        BindValue::Blob(v) => query.bind(v),
        BindValue::Uuid(v) => query.bind(v),
        BindValue::DateTime(v) => query.bind(v),
        BindValue::NaiveDateTime(v) => query.bind(v),
        BindValue::Null => query.bind(Option::<String>::None),
    }
}

pub(crate) fn format_binds_for_log(binds: &[BindValue]) -> String {
    let rendered: Vec<String> = binds.iter().map(BindValue::to_log_string).collect();
    format!("[{}]", rendered.join(", "))
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&String> for BindValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

macro_rules! bind_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for BindValue {
                fn from(value: $ty) -> Self {
                    Self::I64(i64::from(value))
                }
            }
        )*
    };
}

bind_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for BindValue {
    fn from(value: f32) -> Self {
        Self::F64(f64::from(value))
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for BindValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<uuid::Uuid> for BindValue {
    fn from(value: uuid::Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for BindValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

impl From<NaiveDateTime> for BindValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::NaiveDateTime(value)
    }
}

impl<T> From<Option<T>> for BindValue
where
    T: Into<BindValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_default() {
        assert!(BindValue::from(0_i32).is_default());
        assert!(BindValue::from(String::new()).is_default());
        assert!(BindValue::from(false).is_default());
        assert!(BindValue::from(Option::<i64>::None).is_default());
        assert!(BindValue::from(uuid::Uuid::nil()).is_default());
        assert!(!BindValue::from(14_i32).is_default());
        assert!(!BindValue::from("Tom").is_default());
        assert!(!BindValue::from(Some(0.5_f64)).is_default());
    }

    #[test]
    fn json_scalars_convert() {
        assert_eq!(
            BindValue::from_json(&serde_json::json!("x")).unwrap(),
            BindValue::String("x".to_owned())
        );
        assert_eq!(
            BindValue::from_json(&serde_json::json!(3)).unwrap(),
            BindValue::I64(3)
        );
        assert_eq!(
            BindValue::from_json(&serde_json::json!(null)).unwrap(),
            BindValue::Null
        );
        assert!(matches!(
            BindValue::from_json(&serde_json::json!([1, 2])),
            Err(GraftError::ModelShape(_))
        ));
    }

    #[test]
    fn log_format_lists_values() {
        let binds = vec![BindValue::from("Tom"), BindValue::Null, BindValue::from(vec![1_u8, 2])];
        assert_eq!(format_binds_for_log(&binds), "[Tom, NULL, <2 bytes>]");
    }
}
