//! Integration tests exercising the full resolve -> translate -> serialize
//! pipeline through [`composeql::render`], the way the teacher's
//! `integration/compile.rs` drove `prqlc::compile` end to end.

use std::collections::HashMap;

use composeql::ast::generic::Range;
use composeql::ast::{
    next_node_id, CteBinding, FromSource, Labeled, Literal, Materialized, Node, NodeKind,
    PartitionSpec, ScalarNode,
};
use composeql::{pack, render, Catalog, Dialect, ErrorKind, RenderOptions};

fn compact(options: bool) -> RenderOptions {
    RenderOptions { format: options }
}

fn people_orders_catalog(dialect: Dialect) -> Catalog {
    Catalog::new(dialect)
        .with_table(None::<String>, "people", vec!["id", "name", "age"])
        .with_table(None::<String>, "orders", vec!["order_id", "customer_id", "amount"])
}

#[test]
fn selects_and_filters_a_single_table() {
    let catalog = people_orders_catalog(Dialect::Ansi);
    let query = Node::table("people")
        .filter(ScalarNode::fun(
            ">=",
            vec![ScalarNode::get(&["age"]), ScalarNode::lit(Literal::Integer(18))],
        ))
        .select(vec![
            Labeled::new("id", ScalarNode::get(&["id"])),
            Labeled::new("name", ScalarNode::get(&["name"])),
        ]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert_eq!(
        rendered.sql,
        "SELECT \"people_1\".\"id\" AS \"id\", \"people_1\".\"name\" AS \"name\" \
         FROM \"people\" AS \"people_1\" WHERE (\"people_1\".\"age\" >= 18)"
    );
    assert_eq!(rendered.columns, vec!["id".to_string(), "name".to_string()]);
    assert!(rendered.params.is_empty());
}

#[test]
fn collects_dollar_placeholders_for_postgres() {
    let catalog = people_orders_catalog(Dialect::Postgresql);
    let query = Node::table("people")
        .filter(ScalarNode::fun(
            ">=",
            vec![ScalarNode::get(&["age"]), ScalarNode::var("min_age")],
        ))
        .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert!(rendered.sql.contains("$1"));
    assert_eq!(rendered.params, vec!["min_age".to_string()]);

    let mut values = HashMap::new();
    values.insert("min_age".to_string(), Literal::Integer(21));
    let packed = pack(&rendered, &values).unwrap();
    assert_eq!(packed, vec![Literal::Integer(21)]);
}

#[test]
fn joins_two_tables_on_equality() {
    let catalog = people_orders_catalog(Dialect::Ansi);
    let query = Node::table("people")
        .join(
            Node::table("orders"),
            ScalarNode::fun(
                "=",
                vec![ScalarNode::get(&["id"]), ScalarNode::get(&["customer_id"])],
            ),
            false,
            false,
        )
        .select(vec![
            Labeled::new("name", ScalarNode::get(&["name"])),
            Labeled::new("amount", ScalarNode::get(&["amount"])),
        ]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert_eq!(
        rendered.sql,
        "SELECT \"people_1\".\"name\" AS \"name\", \"orders_1\".\"amount\" AS \"amount\" \
         FROM \"people\" AS \"people_1\" JOIN \"orders\" AS \"orders_1\" \
         ON (\"people_1\".\"id\" = \"orders_1\".\"customer_id\")"
    );
}

#[test]
fn groups_and_aggregates_with_sum() {
    let catalog = people_orders_catalog(Dialect::Ansi);
    let customer_id = ScalarNode::get(&["customer_id"]);
    let query = Node::table("orders").group(vec![customer_id]).select(vec![
        Labeled::new("customer_id", ScalarNode::get(&["customer_id"])),
        Labeled::new(
            "total",
            ScalarNode::agg("sum", vec![ScalarNode::get(&["amount"])]),
        ),
    ]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert_eq!(
        rendered.sql,
        "SELECT \"orders_1\".\"customer_id\" AS \"customer_id\", \
         sum(\"orders_1\".\"amount\") AS \"total\" \
         FROM \"orders\" AS \"orders_1\" GROUP BY \"orders_1\".\"customer_id\""
    );
}

#[test]
fn cte_is_promoted_into_a_with_clause() {
    let catalog = Catalog::new(Dialect::Ansi).with_table(None::<String>, "events", vec!["id", "kind"]);

    let signups = Node::table("events").filter(ScalarNode::fun(
        "=",
        vec![
            ScalarNode::get(&["kind"]),
            ScalarNode::lit(Literal::String("signup".to_string())),
        ],
    ));

    let query = Node::reference("signups")
        .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))])
        .with(vec![CteBinding {
            name: "signups".to_string(),
            body: signups,
            materialized: Materialized::Default,
        }]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert_eq!(
        rendered.sql,
        "WITH \"signups\"(\"id\", \"kind\") AS (\
         SELECT \"events_1\".\"id\" AS \"id\", \"events_1\".\"kind\" AS \"kind\" \
         FROM \"events\" AS \"events_1\" WHERE (\"events_1\".\"kind\" = 'signup')) \
         SELECT \"signups\".\"id\" AS \"id\" FROM \"signups\""
    );
    assert_eq!(rendered.columns, vec!["id".to_string()]);
}

#[test]
fn appends_branches_as_union_all() {
    let catalog = Catalog::new(Dialect::Ansi)
        .with_table(None::<String>, "people", vec!["id", "name", "age"])
        .with_table(None::<String>, "archived_people", vec!["id", "name", "age"]);

    let query = Node::table("people")
        .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))])
        .append(vec![Node::table("archived_people")
            .select(vec![Labeled::new("id", ScalarNode::get(&["id"]))])]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert!(rendered.sql.contains("UNION ALL"));
    assert!(rendered.sql.contains("\"people\" AS \"people_1\""));
    assert!(rendered.sql.contains("\"archived_people\" AS"));
}

#[test]
fn partition_produces_a_window_function() {
    let catalog = people_orders_catalog(Dialect::Ansi);
    let query = Node::table("orders")
        .partition(PartitionSpec {
            keys: vec![ScalarNode::get(&["customer_id"])],
            order: vec![ScalarNode::get(&["amount"]).desc()],
            frame: None,
        })
        .select(vec![
            Labeled::new("customer_id", ScalarNode::get(&["customer_id"])),
            Labeled::new(
                "rank",
                ScalarNode::agg("row_number", vec![]),
            ),
        ]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert!(rendered.sql.contains("OVER ("));
    assert!(rendered.sql.contains("PARTITION BY"));
    assert!(rendered.sql.contains("ORDER BY"));
}

#[test]
fn bind_produces_a_lateral_join() {
    let catalog = people_orders_catalog(Dialect::Postgresql);
    let top_order = Node::bind(
        Node::table("orders")
            .filter(ScalarNode::fun(
                "=",
                vec![ScalarNode::get(&["customer_id"]), ScalarNode::var("pid")],
            ))
            .order(vec![ScalarNode::get(&["amount"]).desc()])
            .limit(Range {
                start: Some(0),
                end: Some(1),
            })
            .select(vec![Labeled::new("amount", ScalarNode::get(&["amount"]))]),
        vec![("pid".to_string(), ScalarNode::get(&["id"]))],
    );

    let query = Node::table("people")
        .join(
            top_order,
            ScalarNode::lit(Literal::Boolean(true)),
            false,
            false,
        )
        .select(vec![
            Labeled::new("name", ScalarNode::get(&["name"])),
            Labeled::new("amount", ScalarNode::get(&["amount"])),
        ]);

    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert!(rendered.sql.contains("JOIN LATERAL"));
}

#[test]
fn iterate_produces_with_recursive() {
    let catalog = Catalog::new(Dialect::Postgresql).with_table(None::<String>, "nodes", vec!["id", "parent_id"]);

    let base = Node::table("nodes").filter(ScalarNode::fun(
        "=",
        vec![ScalarNode::get(&["parent_id"]), ScalarNode::lit(Literal::Integer(0))],
    ));
    let step = Node::new(next_node_id(), NodeKind::From(FromSource::Previous), None).select(vec![
        Labeled::new("id", ScalarNode::get(&["id"])),
        Labeled::new("parent_id", ScalarNode::get(&["parent_id"])),
    ]);

    let query = base.iterate(step);
    let rendered = render(&query, &catalog, &compact(false)).unwrap();
    assert!(rendered.sql.contains("WITH RECURSIVE"));
    assert!(rendered.sql.contains("UNION ALL"));
}

#[test]
fn sqlserver_join_lateral_is_unsupported() {
    // SQL Server supports recursive CTEs (without the RECURSIVE keyword) but
    // has no LATERAL join support; a Bind-driven join must fail cleanly.
    let catalog = people_orders_catalog(Dialect::Sqlserver);
    let top_order = Node::bind(
        Node::table("orders").select(vec![Labeled::new("amount", ScalarNode::get(&["amount"]))]),
        vec![("pid".to_string(), ScalarNode::get(&["id"]))],
    );
    let query = Node::table("people")
        .join(top_order, ScalarNode::lit(Literal::Boolean(true)), false, false)
        .select(vec![Labeled::new("amount", ScalarNode::get(&["amount"]))]);

    let err = render(&query, &catalog, &RenderOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedDialectFeature);
}

#[test]
fn unknown_column_is_an_error() {
    let catalog = people_orders_catalog(Dialect::Ansi);
    let query = Node::table("people").select(vec![Labeled::new("ghost", ScalarNode::get(&["ghost"]))]);
    let err = render(&query, &catalog, &RenderOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unresolved);
}
