//! Backend-agnostic SQL generation.
//!
//! Pure functions only: nothing here touches a connection. The relational
//! adapters and the CQL adapter share these builders and differ only in
//! their [`Dialect`].

pub mod builder;
pub mod ddl;
pub mod dialect;
pub mod expr;
pub mod filter;
pub mod literal;

pub use builder::SqlBuilder;
pub use dialect::{Dialect, Placeholder};
pub use expr::{ExprSpec, expr, prefix_upper_bound};
pub use filter::{FilterColumn, filter};
pub use literal::{quote, value_in, value_literal};
