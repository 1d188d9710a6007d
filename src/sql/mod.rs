//! Dialect table and serializer (spec §4.1, §4.6).

pub mod dialect;
pub mod gen_expr;
pub mod gen_query;
pub mod operators;

pub use dialect::{CaseFolding, Dialect, DialectHandler, LimitStyle, PlaceholderStyle};
pub use gen_query::compile;
