//! Relation serializer (spec §4.6): walks the [`Clause`] tree built by
//! [`crate::translate`] and renders a single SQL statement, following the
//! teacher's `sql::compile` shape — build the string, let the caller decide
//! whether to run it through `sqlformat` afterwards.

use crate::ast::{Literal, Materialized};
use crate::plan::{Clause, CteClause, Projection};
use crate::sql::dialect::{DialectHandler, LimitStyle};
use crate::sql::gen_expr::ExprWriter;

/// Renders `clause` to a single compact SQL string and returns the
/// placeholder names in positional order (spec §6: "the caller maps each
/// name to its positional index in order of first occurrence").
pub fn compile(clause: &Clause, dialect: &dyn DialectHandler) -> (String, Vec<String>) {
    let mut writer = ExprWriter::new(dialect);
    let sql = render_stmt(&mut writer, clause);
    (sql, writer.placeholders)
}

/// Entry point used when a `Bind` subquery is rendered inline inside a
/// scalar expression — shares the caller's [`ExprWriter`] so placeholder
/// numbering stays continuous across the whole statement.
pub(crate) fn render_clause_compact(writer: &mut ExprWriter, clause: &Clause) -> String {
    render_stmt(writer, clause)
}

fn render_stmt(writer: &mut ExprWriter, clause: &Clause) -> String {
    match clause {
        Clause::Raw(sql) => return sql.clone(),
        Clause::UnionAll(parts) => {
            return parts
                .iter()
                .map(|p| render_stmt(writer, p))
                .collect::<Vec<_>>()
                .join(" UNION ALL ");
        }
        Clause::With {
            over,
            ctes,
            recursive,
        } => return render_with(writer, over, ctes, *recursive),
        _ => {}
    }

    let (core, order, limit) = peel_order_limit(clause);
    let style = writer.dialect.limit_style();
    let top = match (style, limit) {
        (LimitStyle::Top, Some((0, count))) if count != u64::MAX => Some(count),
        _ => None,
    };

    let mut sql = render_select_core(writer, core, top);
    if let Some(keys) = order {
        let rendered: Vec<String> = keys.iter().map(|k| writer.render_sorted(k)).collect();
        sql.push_str(&format!(" ORDER BY {}", rendered.join(", ")));
    }
    if top.is_none() {
        if let Some((offset, count)) = limit {
            if !(offset == 0 && count == u64::MAX) {
                sql.push_str(&render_limit_clause(writer.dialect, offset, count));
            }
        }
    }
    sql
}

/// Splits off the trailing `Order`/`Limit` wrapper (added last by
/// `translate::finalize_select`) from the `Select` chain beneath it.
fn peel_order_limit(clause: &Clause) -> (&Clause, Option<&Vec<crate::plan::SortedExpr>>, Option<(u64, u64)>) {
    match clause {
        Clause::Limit { over, offset, count } => match over.as_ref() {
            Clause::Order { over: inner, keys } => (inner.as_ref(), Some(keys), Some((*offset, *count))),
            other => (other, None, Some((*offset, *count))),
        },
        Clause::Order { over, keys } => (over.as_ref(), Some(keys), None),
        other => (other, None, None),
    }
}

fn render_limit_clause(dialect: &dyn DialectHandler, offset: u64, count: u64) -> String {
    match dialect.limit_style() {
        LimitStyle::LimitOffset => {
            let mut s = String::new();
            if count != u64::MAX {
                s.push_str(&format!(" LIMIT {count}"));
            }
            if offset != 0 {
                s.push_str(&format!(" OFFSET {offset}"));
            }
            s
        }
        LimitStyle::FetchFirst | LimitStyle::Top => {
            let mut s = format!(" OFFSET {offset} ROWS");
            if count != u64::MAX {
                s.push_str(&format!(" FETCH NEXT {count} ROWS ONLY"));
            }
            s
        }
    }
}

/// Renders the `SELECT ... FROM ... WHERE ... GROUP BY ... HAVING ...` core
/// of a statement. `clause` must be a `Clause::Select`; anything between it
/// and the base relation (`Having`/`Group`/`Where`) is peeled here, mirroring
/// the nesting order `translate::finalize_select` builds.
fn render_select_core(writer: &mut ExprWriter, clause: &Clause, top: Option<u64>) -> String {
    let Clause::Select {
        over,
        distinct,
        projections,
    } = clause
    else {
        // Defensive: a bare relation with no Select wrapper (shouldn't occur
        // from `translate`, but keeps this total rather than panicking).
        return render_relation(writer, clause);
    };

    let mut cur: &Clause = over.as_ref();
    let mut having = None;
    if let Clause::Having { over: o, cond } = cur {
        having = Some(cond);
        cur = o.as_ref();
    }
    let mut group_keys = None;
    if let Clause::Group { over: o, keys } = cur {
        group_keys = Some(keys);
        cur = o.as_ref();
    }
    let mut wheres = None;
    if let Clause::Where { over: o, cond } = cur {
        wheres = Some(cond);
        cur = o.as_ref();
    }

    let proj_sql = render_projections(writer, projections);
    let mut sql = String::from("SELECT ");
    if *distinct {
        sql.push_str("DISTINCT ");
    }
    if let Some(n) = top {
        sql.push_str(&format!("TOP {n} "));
    }
    sql.push_str(&proj_sql);

    if !is_empty_relation(cur) {
        sql.push_str(" FROM ");
        sql.push_str(&render_relation(writer, cur));
    }
    if let Some(w) = wheres {
        sql.push_str(" WHERE ");
        sql.push_str(&writer.render_expr(w));
    }
    if let Some(keys) = group_keys {
        let rendered: Vec<String> = keys.iter().map(|k| writer.render_expr(k)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&rendered.join(", "));
    }
    if let Some(h) = having {
        sql.push_str(" HAVING ");
        sql.push_str(&writer.render_expr(h));
    }
    sql
}

/// `From(Nothing)` lowers to an unset `Frame::base`, serving as a sentinel
/// for "no table to select from" (a constant-only query).
fn is_empty_relation(clause: &Clause) -> bool {
    matches!(clause, Clause::Raw(s) if s.is_empty())
}

fn render_projections(writer: &mut ExprWriter, projections: &[Projection]) -> String {
    projections
        .iter()
        .map(|p| format!("{} AS {}", writer.render_expr(&p.expr), writer.quote_ident(&p.label)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_relation(writer: &mut ExprWriter, clause: &Clause) -> String {
    match clause {
        Clause::From(inner) => render_relation(writer, inner),
        Clause::Join {
            left,
            right,
            on,
            kind,
        } => {
            let keyword = join_keyword(*kind);
            format!(
                "{} {} {} ON {}",
                render_relation(writer, left),
                keyword,
                render_relation(writer, right),
                writer.render_expr(on)
            )
        }
        Clause::As {
            over,
            alias,
            columns,
        } => {
            let is_values = matches!(over.as_ref(), Clause::Values { .. });
            let inner = match over.as_ref() {
                Clause::Id { schema, name } => render_table_id(writer, schema.as_deref(), name),
                Clause::Values { columns: cols, rows } => render_values(writer, cols, rows),
                other => format!("({})", render_stmt(writer, other)),
            };
            let alias_sql = writer.quote_ident(alias);
            let col_list = if is_values && !writer.dialect.supports_values_with_column_aliases() {
                String::new()
            } else {
                columns
                    .as_ref()
                    .map(|cs| {
                        format!(
                            "({})",
                            cs.iter().map(|c| writer.quote_ident(c)).collect::<Vec<_>>().join(", ")
                        )
                    })
                    .unwrap_or_default()
            };
            format!("{inner} AS {alias_sql}{col_list}")
        }
        Clause::Id { schema, name } => render_table_id(writer, schema.as_deref(), name),
        Clause::Ref(name) => writer.quote_ident(name),
        Clause::Values { columns, rows } => render_values(writer, columns, rows),
        other => format!("({})", render_stmt(writer, other)),
    }
}

fn join_keyword(kind: crate::plan::JoinKind) -> &'static str {
    use crate::plan::JoinKind;
    match kind {
        JoinKind::Inner => "JOIN",
        JoinKind::Left => "LEFT JOIN",
        JoinKind::Cross => "CROSS JOIN",
        JoinKind::Lateral => "JOIN LATERAL",
        JoinKind::LateralLeft => "LEFT JOIN LATERAL",
    }
}

fn render_table_id(writer: &ExprWriter, schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(s) => format!("{}.{}", writer.quote_ident(s), writer.quote_ident(name)),
        None => writer.quote_ident(name),
    }
}

fn render_values(writer: &ExprWriter, columns: &[String], rows: &[Vec<Literal>]) -> String {
    let _ = columns;
    let row_sql: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "({})",
                row.iter().map(|l| writer.render_literal(l)).collect::<Vec<_>>().join(", ")
            )
        })
        .collect();
    format!("(VALUES {})", row_sql.join(", "))
}

fn render_with(writer: &mut ExprWriter, over: &Clause, ctes: &[CteClause], recursive: bool) -> String {
    let keyword = if recursive && writer.dialect.recursive_keyword() {
        "WITH RECURSIVE"
    } else {
        "WITH"
    };
    let cte_sql: Vec<String> = ctes.iter().map(|c| render_cte(writer, c)).collect();
    format!("{keyword} {} {}", cte_sql.join(", "), render_stmt(writer, over))
}

fn render_cte(writer: &mut ExprWriter, cte: &CteClause) -> String {
    let name = writer.quote_ident(&cte.name);
    let cols = if cte.columns.is_empty() {
        String::new()
    } else {
        format!(
            "({})",
            cte.columns.iter().map(|c| writer.quote_ident(c)).collect::<Vec<_>>().join(", ")
        )
    };
    let hint = if writer.dialect.supports_materialized_hint() {
        match cte.materialized {
            Materialized::Materialized => "MATERIALIZED ",
            Materialized::NotMaterialized => "NOT MATERIALIZED ",
            Materialized::Default => "",
        }
    } else {
        ""
    };
    format!("{name}{cols} AS {hint}({})", render_stmt(writer, &cte.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ClauseExpr;
    use crate::sql::dialect::{AnsiDialect, SqlserverDialect};

    fn projection(label: &str, table: &str, col: &str) -> Projection {
        Projection {
            label: label.to_string(),
            expr: ClauseExpr::Id(vec![table.to_string(), col.to_string()]),
        }
    }

    fn base_select() -> Clause {
        Clause::Select {
            over: Box::new(Clause::From(Box::new(Clause::As {
                over: Box::new(Clause::id(None::<String>, "people")),
                alias: "people_1".to_string(),
                columns: None,
            }))),
            distinct: false,
            projections: vec![projection("id", "people_1", "id")],
        }
    }

    #[test]
    fn renders_simple_select() {
        let clause = base_select();
        let (sql, placeholders) = compile(&clause, &AnsiDialect);
        assert_eq!(
            sql,
            "SELECT \"people_1\".\"id\" AS \"id\" FROM \"people\" AS \"people_1\""
        );
        assert!(placeholders.is_empty());
    }

    #[test]
    fn renders_limit_offset() {
        let clause = Clause::Limit {
            over: Box::new(base_select()),
            offset: 5,
            count: 10,
        };
        let (sql, _) = compile(&clause, &AnsiDialect);
        assert_eq!(sql, format!("{} LIMIT 10 OFFSET 5", render_base_only()));
    }

    fn render_base_only() -> String {
        compile(&base_select(), &AnsiDialect).0
    }

    #[test]
    fn sqlserver_uses_fetch_first() {
        let clause = Clause::Limit {
            over: Box::new(base_select()),
            offset: 0,
            count: 10,
        };
        let (sql, _) = compile(&clause, &SqlserverDialect);
        assert!(sql.ends_with("OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"));
    }

    #[test]
    fn skips_limit_clause_when_unbounded() {
        let clause = Clause::Limit {
            over: Box::new(base_select()),
            offset: 0,
            count: u64::MAX,
        };
        let (sql, _) = compile(&clause, &AnsiDialect);
        assert_eq!(sql, render_base_only());
    }

    #[test]
    fn emitted_sql_parses_with_sqlparser() {
        use sqlparser::dialect::GenericDialect;
        use sqlparser::parser::Parser;

        let clause = base_select();
        let (sql, _) = compile(&clause, &AnsiDialect);
        let parsed = Parser::parse_sql(&GenericDialect {}, &sql);
        assert!(parsed.is_ok(), "expected valid SQL, got: {sql}\n{parsed:?}");
    }
}
