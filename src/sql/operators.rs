//! Operator/function override table (spec §4.6, step 1): specialized
//! printers for the canonical names the dialect table names explicitly —
//! `and`, `or`, `not`, `in`, `between`, `like`, `concat`, `count`,
//! `count_distinct`, etc. Everything not covered here falls through to the
//! generic template/infix/plain-call rules in `gen_expr` (steps 2-4).
//!
//! Grounded on the teacher's `std.sql.prql` operator-override module, minus
//! its parser dependency: that table lived in a mini-DSL compiled by the
//! (out-of-scope) frontend parser, so here it is plain Rust data instead.

use super::dialect::DialectHandler;

/// Looks up a specialized printer for `name` and, if one exists, renders it
/// against already-serialized `args`. Returns `None` if `name` isn't one of
/// the canonical names the dialect table recognizes, signalling the caller
/// to fall through to the generic template/infix/call rules.
pub fn render_specialized(
    dialect: &dyn DialectHandler,
    name: &str,
    args: &[String],
) -> Option<String> {
    match name {
        "and" => Some(join_infix("AND", args)),
        "or" => Some(join_infix("OR", args)),
        "not" => Some(format!("NOT {}", paren(args.first()?))),
        "in" => Some(format!(
            "{} IN ({})",
            args.first()?,
            args.get(1..)?.join(", ")
        )),
        "not_in" => Some(format!(
            "{} NOT IN ({})",
            args.first()?,
            args.get(1..)?.join(", ")
        )),
        "is_null" => Some(format!("{} IS NULL", args.first()?)),
        "is_not_null" => Some(format!("{} IS NOT NULL", args.first()?)),
        "between" => Some(format!(
            "{} BETWEEN {} AND {}",
            args.first()?,
            args.get(1)?,
            args.get(2)?
        )),
        "not_between" => Some(format!(
            "{} NOT BETWEEN {} AND {}",
            args.first()?,
            args.get(1)?,
            args.get(2)?
        )),
        "like" => Some(format!("{} LIKE {}", args.first()?, args.get(1)?)),
        "not_like" => Some(format!("{} NOT LIKE {}", args.first()?, args.get(1)?)),
        "exists" => Some(format!("EXISTS ({})", args.first()?)),
        "not_exists" => Some(format!("NOT EXISTS ({})", args.first()?)),
        "case" => Some(render_case(args)),
        "cast" => Some(format!("CAST({} AS {})", args.first()?, args.get(1)?)),
        "extract" => Some(format!("EXTRACT({} FROM {})", args.first()?, args.get(1)?)),
        "current_date" => Some("CURRENT_DATE".to_string()),
        "current_timestamp" => Some("CURRENT_TIMESTAMP".to_string()),
        "concat" => Some(render_concat(dialect, args)),
        "count" => Some(render_count(args, false)),
        "count_distinct" => Some(render_count(args, true)),
        _ => None,
    }
}

fn join_infix(op: &str, args: &[String]) -> String {
    if args.len() == 1 {
        return args[0].clone();
    }
    format!("({})", args.join(&format!(" {op} ")))
}

fn paren(arg: &str) -> String {
    format!("({arg})")
}

fn render_case(args: &[String]) -> String {
    // args come in (when, then) pairs, with a trailing else left unpaired.
    let mut out = String::from("CASE");
    let mut it = args.chunks_exact(2);
    for pair in it.by_ref() {
        out.push_str(&format!(" WHEN {} THEN {}", pair[0], pair[1]));
    }
    if let Some(else_) = it.remainder().first() {
        out.push_str(&format!(" ELSE {else_}"));
    }
    out.push_str(" END");
    out
}

fn render_concat(dialect: &dyn DialectHandler, args: &[String]) -> String {
    if dialect.has_concat_function() {
        format!("concat({})", args.join(", "))
    } else {
        args.join(" || ")
    }
}

fn render_count(args: &[String], distinct: bool) -> String {
    let inner = if args.is_empty() {
        "*".to_string()
    } else {
        args.join(", ")
    };
    if distinct {
        format!("count(DISTINCT {inner})")
    } else {
        format!("count({inner})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::AnsiDialect;

    #[test]
    fn renders_between() {
        let got = render_specialized(
            &AnsiDialect,
            "between",
            &["x".into(), "1".into(), "10".into()],
        );
        assert_eq!(got.as_deref(), Some("x BETWEEN 1 AND 10"));
    }

    #[test]
    fn renders_count_star() {
        assert_eq!(
            render_specialized(&AnsiDialect, "count", &[]).as_deref(),
            Some("count(*)")
        );
    }

    #[test]
    fn unknown_name_falls_through() {
        assert!(render_specialized(&AnsiDialect, "my_udf", &["1".into()]).is_none());
    }
}
