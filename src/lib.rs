//! ComposeQL: compiles a tree of query-algebra nodes into dialect-specific
//! SQL text plus positional parameter bindings (spec §1).
//!
//! The pipeline mirrors the teacher's `prqlc::compile` shape: resolve (row
//! types, scopes, required columns) -> translate (lower to the clause tree,
//! merging what the spec calls "assembly" into the same pass — see
//! [`translate`]'s module doc for why) -> serialize ([`sql::gen_query::compile`]).

pub mod ast;
pub mod catalog;
pub mod error;
pub mod plan;
pub mod resolve;
pub mod sql;
pub mod translate;
pub mod utils;

pub use ast::{Literal, Node, NodeId, ScalarNode};
pub use catalog::Catalog;
pub use error::{Error, ErrorKind, Result, WithErrorInfo};
pub use sql::Dialect;

use std::collections::HashMap;

/// Render-time knobs (spec §6), mirroring the teacher's `Options` struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Pretty-print the emitted SQL through `sqlformat` rather than emitting
    /// a single compact line.
    pub format: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions { format: true }
    }
}

/// The compiled result of [`render`]: SQL text, the output column labels in
/// order, and the free parameter names in positional order (spec §6:
/// callers map each name to its positional index in order of first
/// occurrence, see [`pack`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub sql: String,
    pub columns: Vec<String>,
    pub params: Vec<String>,
}

/// Runs the full pipeline — resolve, translate, serialize — over `root`
/// against `catalog`, producing SQL text for the catalog's dialect.
pub fn render(root: &Node, catalog: &Catalog, options: &RenderOptions) -> Result<Rendered> {
    log::debug!("resolve: entering pass");
    let resolution = resolve::resolve(root, catalog)?;
    log::debug!("resolve: done, {} node(s) typed", resolution.row_types.len());

    let dialect = catalog.dialect().handler();
    log::debug!("translate: entering pass (dialect = {})", catalog.dialect());
    let (clause, columns) = translate::translate(root, &resolution, catalog, dialect.as_ref())?;

    let (sql, params) = sql::gen_query::compile(&clause, dialect.as_ref());
    log::trace!("serialize: {} free parameter(s)", params.len());

    let sql = if options.format {
        sqlformat::format(
            &sql,
            &sqlformat::QueryParams::None,
            &sqlformat::FormatOptions::default(),
        )
    } else {
        sql
    };

    Ok(Rendered {
        sql,
        columns,
        params,
    })
}

/// Maps each named placeholder in `rendered.params` to its bound [`Literal`]
/// value, in positional order, erroring if a name the query actually uses
/// has no corresponding entry in `values` (spec §6's "named-to-positional"
/// packing step; this function has no direct teacher precedent, see
/// DESIGN.md).
pub fn pack(rendered: &Rendered, values: &HashMap<String, Literal>) -> Result<Vec<Literal>> {
    rendered
        .params
        .iter()
        .map(|name| {
            values.get(name).cloned().ok_or_else(|| {
                Error::new(
                    ErrorKind::MissingParameter,
                    error::Reason::NotFound {
                        name: name.clone(),
                        namespace: "parameter".to_string(),
                    },
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Labeled;

    fn people_catalog() -> Catalog {
        Catalog::new(Dialect::Postgresql).with_table(
            None::<String>,
            "people",
            vec!["id", "name", "age"],
        )
    }

    #[test]
    fn renders_simple_select() {
        let query = Node::table("people").select(vec![Labeled::new("name", ScalarNode::get(&["name"]))]);
        let rendered = render(&query, &people_catalog(), &RenderOptions { format: false }).unwrap();
        assert!(rendered.sql.contains("SELECT"));
        assert_eq!(rendered.columns, vec!["name".to_string()]);
    }

    #[test]
    fn collects_placeholders_in_left_to_right_order() {
        let query = Node::table("people")
            .filter(ScalarNode::fun(
                ">=",
                vec![ScalarNode::get(&["age"]), ScalarNode::var("min_age")],
            ))
            .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))]);
        let rendered = render(&query, &people_catalog(), &RenderOptions { format: false }).unwrap();
        assert_eq!(rendered.params, vec!["min_age".to_string()]);
    }

    #[test]
    fn pack_maps_named_values_positionally() {
        let rendered = Rendered {
            sql: String::new(),
            columns: vec![],
            params: vec!["min_age".to_string(), "max_age".to_string()],
        };
        let mut values = HashMap::new();
        values.insert("min_age".to_string(), Literal::Integer(18));
        values.insert("max_age".to_string(), Literal::Integer(65));
        let packed = pack(&rendered, &values).unwrap();
        assert_eq!(packed, vec![Literal::Integer(18), Literal::Integer(65)]);
    }

    #[test]
    fn pack_errors_on_missing_value() {
        let rendered = Rendered {
            sql: String::new(),
            columns: vec![],
            params: vec!["x".to_string()],
        };
        let err = pack(&rendered, &HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingParameter);
    }

    #[test]
    fn unknown_table_is_an_error() {
        let query = Node::table("ghost").select(vec![Labeled::new("id", ScalarNode::get(&["id"]))]);
        let err = render(&query, &people_catalog(), &RenderOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTable);
    }
}
