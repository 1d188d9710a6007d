//! Dialect table (spec §4.1): per-dialect quoting, placeholder style, LIMIT
//! syntax, literal formatting and feature flags, plus the operator/function
//! override table (kept in [`super::operators`]).
//!
//! Grounded on the teacher's `sql::dialect::{Dialect, DialectHandler}` split
//! between a serializable enum and a `dyn` handler trait with sensible
//! defaults, narrowed to the dialects this spec names.

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "snake_case")]
pub enum Dialect {
    #[default]
    Ansi,
    Sqlite,
    Postgresql,
    Mysql,
    Sqlserver,
    Redshift,
    Spark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH FIRST n ROWS ONLY`
    FetchFirst,
    /// `SELECT TOP n ...` (no `OFFSET`-only form; Sqlserver also supports
    /// `FETCH FIRST` when an `ORDER BY` is present, but `TOP` is simpler and
    /// always valid, so we always emit the `FETCH FIRST` form for Sqlserver
    /// to support `OFFSET` uniformly — see `DialectHandler::limit_style`).
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `?1`, `?2`, …
    QuestionNumbered,
    /// `$1`, `$2`, …
    Dollar,
    /// `:name`
    NamedColon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFolding {
    Preserve,
    Lower,
    Upper,
}

impl Dialect {
    pub fn handler(&self) -> Box<dyn DialectHandler> {
        match self {
            Dialect::Ansi => Box::new(AnsiDialect),
            Dialect::Sqlite => Box::new(SqliteDialect),
            Dialect::Postgresql => Box::new(PostgresqlDialect),
            Dialect::Mysql => Box::new(MysqlDialect),
            Dialect::Sqlserver => Box::new(SqlserverDialect),
            Dialect::Redshift => Box::new(RedshiftDialect),
            Dialect::Spark => Box::new(SparkDialect),
        }
    }
}

pub trait DialectHandler: std::fmt::Debug {
    fn ident_quote(&self) -> char {
        '"'
    }

    fn placeholder(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::LimitOffset
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    fn max_identifier_length(&self) -> Option<usize> {
        None
    }

    fn case_folding(&self) -> CaseFolding {
        CaseFolding::Preserve
    }

    fn supports_with(&self) -> bool {
        true
    }

    fn supports_with_recursive(&self) -> bool {
        true
    }

    /// Whether a recursive `WITH` needs the literal `RECURSIVE` keyword.
    /// Only meaningful when [`Self::supports_with_recursive`] is `true`.
    fn recursive_keyword(&self) -> bool {
        true
    }

    fn supports_materialized_hint(&self) -> bool {
        false
    }

    fn supports_window_frames(&self) -> bool {
        true
    }

    fn supports_lateral(&self) -> bool {
        true
    }

    fn supports_values_with_column_aliases(&self) -> bool {
        true
    }

    fn supports_table_valued_functions(&self) -> bool {
        false
    }

    fn has_concat_function(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct AnsiDialect;
#[derive(Debug)]
pub struct SqliteDialect;
#[derive(Debug)]
pub struct PostgresqlDialect;
#[derive(Debug)]
pub struct MysqlDialect;
#[derive(Debug)]
pub struct SqlserverDialect;
#[derive(Debug)]
pub struct RedshiftDialect;
#[derive(Debug)]
pub struct SparkDialect;

impl DialectHandler for AnsiDialect {}

impl DialectHandler for SqliteDialect {
    fn placeholder(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionNumbered
    }

    fn supports_materialized_hint(&self) -> bool {
        true
    }

    fn has_concat_function(&self) -> bool {
        false
    }
}

impl DialectHandler for PostgresqlDialect {
    fn placeholder(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    fn supports_materialized_hint(&self) -> bool {
        true
    }
}

impl DialectHandler for MysqlDialect {
    fn ident_quote(&self) -> char {
        '`'
    }

    fn case_folding(&self) -> CaseFolding {
        CaseFolding::Lower
    }

    fn supports_with_recursive(&self) -> bool {
        // MySQL 8+ supports `WITH RECURSIVE`; older versions don't, but we
        // target the modern dialect (spec §4.1 generic-first principle).
        true
    }

    fn has_concat_function(&self) -> bool {
        true
    }
}

impl DialectHandler for SqlserverDialect {
    fn limit_style(&self) -> LimitStyle {
        LimitStyle::FetchFirst
    }

    fn supports_with_recursive(&self) -> bool {
        // T-SQL supports recursive CTEs via plain `WITH`, without the
        // `RECURSIVE` keyword.
        true
    }

    fn recursive_keyword(&self) -> bool {
        false
    }

    fn supports_lateral(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> Option<usize> {
        Some(128)
    }
}

impl DialectHandler for RedshiftDialect {
    fn placeholder(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }

    fn supports_lateral(&self) -> bool {
        false
    }
}

impl DialectHandler for SparkDialect {
    fn ident_quote(&self) -> char {
        '`'
    }

    fn supports_materialized_hint(&self) -> bool {
        false
    }

    fn supports_table_valued_functions(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::Dialect;

    #[test]
    fn parses_dialect_names() {
        assert_eq!(Dialect::from_str("postgresql"), Ok(Dialect::Postgresql));
        assert_eq!(Dialect::from_str("sqlserver"), Ok(Dialect::Sqlserver));
        assert!(Dialect::from_str("oracle").is_err());
    }

    #[test]
    fn default_is_ansi() {
        assert_eq!(Dialect::default(), Dialect::Ansi);
    }
}
