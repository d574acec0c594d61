/// Graft-specific error type with actionable variants.
#[derive(Debug)]
pub enum GraftError {
    /// Underlying sqlx error (constraint violations, malformed SQL, I/O).
    Sqlx(sqlx::Error),
    /// The `?` count of a condition clause does not match its arguments.
    MalformedConditions { placeholders: usize, arguments: usize },
    /// The model (or a name used with it) does not resolve to a column or association.
    ModelShape(String),
    /// An operation that expects at most one row matched several.
    AmbiguousRow { table: String, matches: usize },
    /// Invalid connection configuration.
    Config(String),
}

impl GraftError {
    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::ModelShape(message.into())
    }

    /// Returns `true` when the database rejected a statement because of a
    /// UNIQUE, NOT NULL, CHECK or FOREIGN KEY constraint.
    pub fn is_constraint_violation(&self) -> bool {
        use sqlx::error::ErrorKind;
        match self {
            Self::Sqlx(sqlx::Error::Database(db_err)) => matches!(
                db_err.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
                    | ErrorKind::ForeignKeyViolation
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for GraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlx(err) => write!(f, "sqlx error: {}", err),
            Self::MalformedConditions {
                placeholders,
                arguments,
            } => write!(
                f,
                "malformed conditions: {} placeholder(s) but {} argument(s)",
                placeholders, arguments
            ),
            Self::ModelShape(message) => write!(f, "model shape error: {}", message),
            Self::AmbiguousRow { table, matches } => write!(
                f,
                "expected at most one row in {} but {} matched",
                table, matches
            ),
            Self::Config(message) => write!(f, "config error: {}", message),
        }
    }
}

impl std::error::Error for GraftError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlx(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for GraftError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

/// Result alias for Graft operations.
pub type GraftResult<T> = Result<T, GraftError>;
