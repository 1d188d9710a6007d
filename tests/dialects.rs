//! Dialect matrix: the same parameterized query rendered against each
//! dialect, checking its placeholder token lands as that dialect's
//! `DialectHandler::placeholder` style promises.

use composeql::ast::{Labeled, ScalarNode};
use composeql::{render, Catalog, Dialect, RenderOptions};
use rstest::rstest;

fn catalog(dialect: Dialect) -> Catalog {
    Catalog::new(dialect).with_table(None::<String>, "people", vec!["id", "age"])
}

fn query() -> composeql::Node {
    composeql::Node::table("people")
        .filter(ScalarNode::fun(
            ">=",
            vec![ScalarNode::get(&["age"]), ScalarNode::var("min_age")],
        ))
        .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))])
}

#[rstest]
#[case(Dialect::Ansi, "?")]
#[case(Dialect::Mysql, "?")]
#[case(Dialect::Sqlserver, "?")]
#[case(Dialect::Spark, "?")]
#[case(Dialect::Sqlite, "?1")]
#[case(Dialect::Postgresql, "$1")]
#[case(Dialect::Redshift, "$1")]
fn placeholder_token_matches_dialect(#[case] dialect: Dialect, #[case] token: &str) {
    let rendered = render(
        &query(),
        &catalog(dialect),
        &RenderOptions { format: false },
    )
    .unwrap();
    assert!(
        rendered.sql.contains(token),
        "dialect {dialect:?}: expected {token} in {}",
        rendered.sql
    );
}

#[rstest]
#[case(Dialect::Sqlserver, "FETCH NEXT")]
#[case(Dialect::Ansi, "LIMIT")]
#[case(Dialect::Postgresql, "LIMIT")]
fn limit_clause_matches_dialect_style(#[case] dialect: Dialect, #[case] needle: &str) {
    let query = composeql::Node::table("people")
        .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))])
        .limit(composeql::ast::generic::Range {
            start: Some(0),
            end: Some(10),
        });
    let rendered = render(&query, &catalog(dialect), &RenderOptions { format: false }).unwrap();
    assert!(
        rendered.sql.contains(needle),
        "dialect {dialect:?}: expected {needle} in {}",
        rendered.sql
    );
}
