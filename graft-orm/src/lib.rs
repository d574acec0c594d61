//! # Graft ORM
//!
//! Association-aware persistence for SQLite. Declare models with
//! `#[derive(Model)]`, then save, update, delete and query them through a
//! [`Graft`] handle. Saves walk loaded associations, deletes cascade or
//! clear foreign keys per association, and every call runs in one
//! transaction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graft_orm::prelude::*;
//!
//! #[derive(Model, Debug, Default)]
//! struct Classroom {
//!     id: i64,
//!     name: String,
//!     #[has_many(Student, on_delete = cascade)]
//!     students: Option<Vec<Student>>,
//! }
//!
//! #[derive(Model, Debug, Default)]
//! struct Student {
//!     id: i64,
//!     name: String,
//!     age: i32,
//! }
//!
//! # async fn example() -> Result<(), GraftError> {
//! let db = Graft::open("sqlite://school.db").await?;
//! db.sync::<Classroom>().await?;
//! db.sync::<Student>().await?;
//!
//! let mut room = Classroom {
//!     name: "7B".to_owned(),
//!     students: Some(vec![Student { name: "Tom".to_owned(), age: 14, ..Default::default() }]),
//!     ..Default::default()
//! };
//! room.save(&db).await?;
//!
//! // Removes the classroom and its student.
//! assert_eq!(room.delete(&db).await?, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Associations
//!
//! - `#[has_many(T, on_delete = cascade | set_null)]` on `Option<Vec<T>>`
//! - `#[has_one(T, on_delete = cascade | set_null)]` on `Option<T>`
//! - `#[belongs_to(T)]` on `Option<T>` or `Option<Box<T>>`
//! - `#[many_to_many(T)]` on `Option<Vec<T>>`
//!
//! `None` leaves an association untouched; `Some(vec![])` removes it.
//! `#[many_to_many(Self)]` pairs rows of one table through
//! `<table>_<field>`.
//!
//! Scalar vectors such as `tags: Vec<String>` are collections: stored in
//! `<table>_<field>`, loaded with their owner and replaced on save.

pub use graft_core::*;
pub use graft_macros::Model;

pub mod prelude {
    pub use graft_core::prelude::*;

    pub use crate::Model;
}
