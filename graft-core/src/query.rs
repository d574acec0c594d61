use std::fmt::Write;

use sqlx::pool::PoolConnection;
use sqlx::{Decode, Row, Sqlite, Type};

use crate::conditions::Conditions;
use crate::database::Graft;
use crate::error::{GraftError, GraftResult};
use crate::executor::{self, CHUNK_SIZE, placeholders};
use crate::model::Model;
use crate::value::BindValue;

#[derive(Debug, Clone)]
enum Filter {
    Compare {
        column: String,
        op: &'static str,
        value: BindValue,
    },
    Conditions(Conditions),
}

/// Fluent read query over the table of `M`.
///
/// Column names given to the builder are checked against the model's
/// columns when the query runs; values are always bound.
pub struct QueryBuilder<'a, M> {
    db: &'a Graft,
    columns: Vec<String>,
    filters: Vec<Filter>,
    order: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    includes: Vec<String>,
    error: Option<GraftError>,
    _marker: std::marker::PhantomData<M>,
}

impl<M> std::fmt::Debug for QueryBuilder<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("columns", &self.columns)
            .field("filters", &self.filters)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("includes", &self.includes)
            .finish()
    }
}

impl<'a, M: Model> QueryBuilder<'a, M> {
    pub fn new(db: &'a Graft) -> Self {
        Self {
            db,
            columns: Vec::new(),
            filters: Vec::with_capacity(2),
            order: Vec::new(),
            limit: None,
            offset: None,
            includes: Vec::new(),
            error: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Restricts the fetched columns; `id` is always fetched. Fields whose
    /// column is not selected keep their default value.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds a `WHERE` fragment with `?` placeholders.
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        if let Err(err) = conditions.validate() {
            self.fail(err);
        }
        self.filters.push(Filter::Conditions(conditions));
        self
    }

    pub fn filter_eq(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "=", value.into())
    }

    pub fn filter_gt(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, ">", value.into())
    }

    pub fn filter_lt(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "<", value.into())
    }

    /// Orders by `"column"`, `"column asc"` or `"column desc"`; several
    /// terms may be separated by commas.
    pub fn order(mut self, order: &str) -> Self {
        for term in order.split(',').map(str::trim).filter(|term| !term.is_empty()) {
            let mut parts = term.split_whitespace();
            let column = parts.next().unwrap_or_default().to_owned();
            let descending = match parts.next().map(str::to_ascii_lowercase).as_deref() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    self.fail(GraftError::shape(format!("unknown order direction {}", other)));
                    false
                }
            };
            if parts.next().is_some() {
                self.fail(GraftError::shape(format!("malformed order term {:?}", term)));
            }
            self.order.push((column, descending));
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Eager loads the association held in `field`.
    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.includes.push(field.into());
        self
    }

    /// Eager loads every declared association.
    pub fn eager(mut self) -> Self {
        for relation in M::relations() {
            if !self.includes.iter().any(|field| field == relation.field) {
                self.includes.push(relation.field.to_owned());
            }
        }
        self
    }

    #[tracing::instrument(skip(self), fields(table = M::table_name()))]
    pub async fn all(mut self) -> GraftResult<Vec<M>> {
        let (sql, binds) = self.select_sql()?;
        let handle = self.db.lock().await;
        let mut conn = handle.pool.acquire().await?;
        let mut models = executor::fetch_models::<M>(&mut conn, "select", &sql, binds).await?;
        load_includes(&mut models, &self.includes, &mut conn).await?;
        Ok(models)
    }

    /// First row by the requested order, or by `id`.
    pub async fn first(mut self) -> GraftResult<Option<M>> {
        if self.order.is_empty() {
            self.order.push(("id".to_owned(), false));
        }
        self.limit = Some(1);
        Ok(self.all().await?.into_iter().next())
    }

    /// Last row by the requested order, or by `id`.
    pub async fn last(mut self) -> GraftResult<Option<M>> {
        if self.order.is_empty() {
            self.order.push(("id".to_owned(), true));
            self.limit = Some(1);
            return Ok(self.all().await?.into_iter().next());
        }
        Ok(self.all().await?.pop())
    }

    /// The only matching row; several matches are an [`GraftError::AmbiguousRow`].
    pub async fn one(self) -> GraftResult<Option<M>> {
        let mut models = self.all().await?;
        if models.len() > 1 {
            return Err(GraftError::AmbiguousRow {
                table: M::table_name().to_owned(),
                matches: models.len(),
            });
        }
        Ok(models.pop())
    }

    pub async fn count(self) -> GraftResult<i64> {
        let count: Option<i64> = self.aggregate("COUNT(*)").await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn exists(self) -> GraftResult<bool> {
        Ok(self.limit(1).count().await? > 0)
    }

    /// Mean of `column`, `0.0` when nothing matches.
    pub async fn average(self, column: &str) -> GraftResult<f64> {
        self.check_column(column)?;
        let mean: Option<f64> = self.aggregate(&format!("AVG({})", column)).await?;
        Ok(mean.unwrap_or(0.0))
    }

    /// `None` when nothing matches.
    pub async fn sum<T>(self, column: &str) -> GraftResult<Option<T>>
    where
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
    {
        self.check_column(column)?;
        self.aggregate(&format!("SUM({})", column)).await
    }

    pub async fn max<T>(self, column: &str) -> GraftResult<Option<T>>
    where
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
    {
        self.check_column(column)?;
        self.aggregate(&format!("MAX({})", column)).await
    }

    pub async fn min<T>(self, column: &str) -> GraftResult<Option<T>>
    where
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
    {
        self.check_column(column)?;
        self.aggregate(&format!("MIN({})", column)).await
    }

    fn compare(mut self, column: &str, op: &'static str, value: BindValue) -> Self {
        self.filters.push(Filter::Compare {
            column: column.to_owned(),
            op,
            value,
        });
        self
    }

    fn fail(&mut self, err: GraftError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn check_column(&self, column: &str) -> GraftResult<()> {
        if M::list_columns().iter().any(|known| *known == column) {
            Ok(())
        } else {
            Err(GraftError::shape(format!(
                "{} has no column named {}",
                M::table_name(),
                column
            )))
        }
    }

    /// Surfaces the first builder error, then validates every column name.
    fn check(&mut self) -> GraftResult<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for column in &self.columns {
            self.check_column(column)?;
        }
        for filter in &self.filters {
            if let Filter::Compare { column, .. } = filter {
                self.check_column(column)?;
            }
        }
        for (column, _) in &self.order {
            self.check_column(column)?;
        }
        Ok(())
    }

    fn render_where(&self, sql: &mut String, binds: &mut Vec<BindValue>) {
        let mut has_where = false;
        for filter in &self.filters {
            match filter {
                Filter::Compare { column, op, value } => {
                    sql.push_str(if has_where { " AND " } else { " WHERE " });
                    let _ = write!(sql, "{} {} ?", column, op);
                    binds.push(value.clone());
                    has_where = true;
                }
                Filter::Conditions(conditions) => {
                    if conditions.clause().trim().is_empty() {
                        continue;
                    }
                    conditions.render_into(sql, binds, has_where);
                    has_where = true;
                }
            }
        }
    }

    fn render_tail(&self, sql: &mut String) {
        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|(column, descending)| {
                    format!("{} {}", column, if *descending { "DESC" } else { "ASC" })
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(sql, " LIMIT {} OFFSET {}", limit, offset);
            }
            (Some(limit), None) => {
                let _ = write!(sql, " LIMIT {}", limit);
            }
            (None, Some(offset)) => {
                let _ = write!(sql, " LIMIT -1 OFFSET {}", offset);
            }
            (None, None) => {}
        }
    }

    fn select_sql(&mut self) -> GraftResult<(String, Vec<BindValue>)> {
        self.check()?;
        let mut sql = String::with_capacity(128);
        if self.columns.is_empty() {
            sql.push_str("SELECT *");
        } else {
            sql.push_str("SELECT id");
            for column in self.columns.iter().filter(|column| *column != "id") {
                let _ = write!(sql, ", {}", column);
            }
        }
        let _ = write!(sql, " FROM {}", M::table_name());
        let mut binds = Vec::new();
        self.render_where(&mut sql, &mut binds);
        self.render_tail(&mut sql);
        Ok((sql, binds))
    }

    /// Runs `expression` over the matching rows, honoring limit and offset.
    async fn aggregate<T>(mut self, expression: &str) -> GraftResult<Option<T>>
    where
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite> + Send + Unpin,
    {
        self.check()?;
        let mut inner = format!("SELECT * FROM {}", M::table_name());
        let mut binds = Vec::new();
        self.render_where(&mut inner, &mut binds);
        self.render_tail(&mut inner);
        let sql = format!("SELECT {} FROM ({})", expression, inner);

        let handle = self.db.lock().await;
        let mut conn = handle.pool.acquire().await?;
        let rows = executor::fetch_rows(&mut conn, "aggregate", M::table_name(), &sql, binds).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get::<Option<T>, _>(0)?),
            None => Ok(None),
        }
    }
}

async fn load_includes<M: Model>(
    models: &mut [M],
    includes: &[String],
    conn: &mut PoolConnection<Sqlite>,
) -> GraftResult<()> {
    if models.is_empty() {
        return Ok(());
    }
    for field in includes {
        M::eager_load(models, field, &mut **conn).await?;
    }
    Ok(())
}

impl Graft {
    pub fn query<M: Model>(&self) -> QueryBuilder<'_, M> {
        QueryBuilder::new(self)
    }

    pub async fn find<M: Model>(&self, id: i64) -> GraftResult<Option<M>> {
        self.query::<M>().filter_eq("id", id).one().await
    }

    /// [`Graft::find`] with every association loaded one level deep.
    pub async fn find_eager<M: Model>(&self, id: i64) -> GraftResult<Option<M>> {
        self.query::<M>().filter_eq("id", id).eager().one().await
    }

    /// Rows with the given ids, in id order.
    pub async fn find_all<M: Model>(&self, ids: &[i64]) -> GraftResult<Vec<M>> {
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK_SIZE) {
            let conditions = Conditions::new(format!("id IN ({})", placeholders(chunk.len())))
                .args(chunk.iter().copied());
            found.extend(self.query::<M>().conditions(conditions).all().await?);
        }
        found.sort_by_key(|model| model.id());
        Ok(found)
    }

    pub async fn find_first<M: Model>(&self) -> GraftResult<Option<M>> {
        self.query::<M>().first().await
    }

    pub async fn find_last<M: Model>(&self) -> GraftResult<Option<M>> {
        self.query::<M>().last().await
    }

    pub async fn count<M: Model>(&self) -> GraftResult<i64> {
        self.query::<M>().count().await
    }

    /// Runs a complete `SELECT` statement and hydrates `M` from its rows.
    ///
    /// The clause of `statement` is the whole query, e.g.
    /// `Conditions::new("SELECT * FROM students WHERE age > ?").arg(12)`.
    #[tracing::instrument(skip_all, fields(table = M::table_name()))]
    pub async fn find_by_sql<M: Model>(&self, statement: Conditions) -> GraftResult<Vec<M>> {
        statement.validate()?;
        let binds = statement.arguments().to_vec();
        let handle = self.lock().await;
        let mut conn = handle.pool.acquire().await?;
        executor::fetch_models::<M>(&mut conn, "select", statement.clause(), binds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Relation;
    use futures_util::future::BoxFuture;
    use sqlx::SqliteConnection;
    use sqlx::sqlite::SqliteRow;

    #[derive(Debug, Default)]
    struct Pupil {
        id: i64,
        name: String,
        age: i64,
    }

    impl<'r> sqlx::FromRow<'r, SqliteRow> for Pupil {
        fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
            Ok(Self {
                id: row.try_get("id")?,
                name: row.try_get("name").unwrap_or_default(),
                age: row.try_get("age").unwrap_or_default(),
            })
        }
    }

    impl crate::model::Record for Pupil {
        fn table(&self) -> &'static str {
            "pupils"
        }
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
        fn column_values(&self) -> Vec<(&'static str, BindValue)> {
            vec![("name", self.name.clone().into()), ("age", self.age.into())]
        }
        fn default_values(&self) -> Vec<(&'static str, BindValue)> {
            Pupil::default().column_values()
        }
        fn associations(&self) -> Vec<Relation> {
            Vec::new()
        }
        fn associated_mut(&mut self, _field: &str) -> Option<Vec<&mut dyn crate::model::Record>> {
            None
        }
    }

    impl Model for Pupil {
        fn table_name() -> &'static str {
            "pupils"
        }
        fn foreign_key() -> &'static str {
            "pupil_id"
        }
        fn create_table_sql() -> String {
            "CREATE TABLE IF NOT EXISTS pupils (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)"
                .to_owned()
        }
        fn list_columns() -> Vec<&'static str> {
            vec!["id", "name", "age"]
        }
        fn relations() -> Vec<Relation> {
            Vec::new()
        }
        fn eager_load<'c>(
            _models: &'c mut [Self],
            field: &'c str,
            _conn: &'c mut SqliteConnection,
        ) -> BoxFuture<'c, GraftResult<()>> {
            Box::pin(async move { Err(GraftError::shape(format!("no association {}", field))) })
        }
    }

    async fn seeded() -> Graft {
        let db = Graft::memory().await.unwrap();
        {
            let handle = db.lock().await;
            sqlx::query(&Pupil::create_table_sql())
                .execute(&handle.pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO pupils (name, age) VALUES ('Tom', 14), ('Ann', 12), ('Bob', 14)")
                .execute(&handle.pool)
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn select_sql_renders_filters_order_and_paging() {
        let db = Graft::memory().await.unwrap();
        let mut query = db
            .query::<Pupil>()
            .select(["name"])
            .filter_gt("age", 12)
            .conditions(Conditions::new("name <> ?").arg("Bob"))
            .order("age desc, name")
            .limit(5)
            .offset(2);
        let (sql, binds) = query.select_sql().unwrap();
        assert_eq!(
            sql,
            "SELECT id, name FROM pupils WHERE age > ? AND (name <> ?) \
             ORDER BY age DESC, name ASC LIMIT 5 OFFSET 2"
        );
        assert_eq!(binds, vec![BindValue::I64(12), BindValue::from("Bob")]);
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let db = seeded().await;
        let err = db.query::<Pupil>().filter_eq("grade", 1).all().await.unwrap_err();
        assert!(matches!(err, GraftError::ModelShape(_)));
        let err = db.query::<Pupil>().order("age sideways").all().await.unwrap_err();
        assert!(matches!(err, GraftError::ModelShape(_)));
    }

    #[tokio::test]
    async fn terminals_read_back_rows() {
        let db = seeded().await;
        let first = db.find_first::<Pupil>().await.unwrap().unwrap();
        assert_eq!(first.name, "Tom");
        let last = db.find_last::<Pupil>().await.unwrap().unwrap();
        assert_eq!(last.name, "Bob");
        assert_eq!(db.count::<Pupil>().await.unwrap(), 3);
        assert!(db.query::<Pupil>().filter_eq("name", "Ann").exists().await.unwrap());

        let names: Vec<String> = db
            .query::<Pupil>()
            .select(["name"])
            .order("name")
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|pupil| pupil.name)
            .collect();
        assert_eq!(names, vec!["Ann", "Bob", "Tom"]);
    }

    #[tokio::test]
    async fn one_rejects_several_matches() {
        let db = seeded().await;
        let err = db.query::<Pupil>().filter_eq("age", 14).one().await.unwrap_err();
        assert!(matches!(err, GraftError::AmbiguousRow { matches: 2, .. }));
        let ann = db.query::<Pupil>().filter_lt("age", 14).one().await.unwrap();
        assert_eq!(ann.map(|pupil| pupil.name), Some("Ann".to_owned()));
    }

    #[tokio::test]
    async fn aggregates_cover_matching_rows() {
        let db = seeded().await;
        let mean = db.query::<Pupil>().average("age").await.unwrap();
        assert!((mean - 40.0 / 3.0).abs() < 1e-9);
        assert_eq!(db.query::<Pupil>().sum::<i64>("age").await.unwrap(), Some(40));
        assert_eq!(db.query::<Pupil>().max::<i64>("age").await.unwrap(), Some(14));
        assert_eq!(db.query::<Pupil>().min::<i64>("age").await.unwrap(), Some(12));
        let none = db.query::<Pupil>().filter_gt("age", 99);
        assert_eq!(none.max::<i64>("age").await.unwrap(), None);
        assert_eq!(db.query::<Pupil>().filter_gt("age", 99).average("age").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn find_all_and_find_by_sql() {
        let db = seeded().await;
        let found = db.find_all::<Pupil>(&[3, 1, 42]).await.unwrap();
        assert_eq!(found.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3]);

        let older = db
            .find_by_sql::<Pupil>(Conditions::new("SELECT * FROM pupils WHERE age > ?").arg(12))
            .await
            .unwrap();
        assert_eq!(older.len(), 2);

        let err = db
            .find_by_sql::<Pupil>(Conditions::new("SELECT * FROM pupils WHERE age > ?"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraftError::MalformedConditions { .. }));
    }
}
