//! Scalar serializer (spec §4.6): renders [`ClauseExpr`] to SQL text and
//! collects placeholders into positional order.
//!
//! The operator/function override cascade follows the teacher's
//! `sql::pq::context`/`std.sql.prql` layering: a dialect-specific printer
//! first (`operators::render_specialized`), then falling through to a
//! plain `name(args...)` call or, for symbolic operator names, infix
//! notation.

use crate::ast::Literal;
use crate::plan::{ClauseExpr, SortedExpr};
use crate::sql::dialect::DialectHandler;
use crate::sql::operators::render_specialized;

/// Per-render state: the dialect in play and the placeholder names seen so
/// far, in first-occurrence order (spec §6: "named parameters are assigned
/// positions in left-to-right order of first occurrence").
pub struct ExprWriter<'a> {
    pub dialect: &'a dyn DialectHandler,
    pub placeholders: Vec<String>,
}

impl<'a> ExprWriter<'a> {
    pub fn new(dialect: &'a dyn DialectHandler) -> Self {
        ExprWriter {
            dialect,
            placeholders: Vec::new(),
        }
    }

    pub fn quote_ident(&self, name: &str) -> String {
        let q = self.dialect.ident_quote();
        format!("{q}{name}{q}")
    }

    /// Qualified column reference, e.g. `["person_1", "name"]` -> `"person_1"."name"`.
    pub fn render_id(&self, parts: &[String]) -> String {
        parts
            .iter()
            .map(|p| self.quote_ident(p))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn render_literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Null => "NULL".to_string(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{v:.1}")
                } else {
                    v.to_string()
                }
            }
            Literal::Boolean(b) => self.dialect.bool_literal(*b).to_string(),
            Literal::String(s) => quote_string(s),
            Literal::Date(s) => format!("DATE '{}'", escape_single_quotes(s)),
            Literal::Time(s) => format!("TIME '{}'", escape_single_quotes(s)),
            Literal::Timestamp(s) => format!("TIMESTAMP '{}'", escape_single_quotes(s)),
            Literal::Interval { n, unit } => format!("INTERVAL '{n}' {unit}"),
        }
    }

    /// Assigns (or reuses) a positional slot for `name` and renders the
    /// dialect-appropriate placeholder token.
    pub fn render_placeholder(&mut self, name: &str) -> String {
        let position = match self.placeholders.iter().position(|p| p == name) {
            Some(i) => i,
            None => {
                self.placeholders.push(name.to_string());
                self.placeholders.len() - 1
            }
        };
        match self.dialect.placeholder() {
            crate::sql::dialect::PlaceholderStyle::Question => "?".to_string(),
            crate::sql::dialect::PlaceholderStyle::QuestionNumbered => {
                format!("?{}", position + 1)
            }
            crate::sql::dialect::PlaceholderStyle::Dollar => format!("${}", position + 1),
            crate::sql::dialect::PlaceholderStyle::NamedColon => format!(":{name}"),
        }
    }

    pub fn render_expr(&mut self, expr: &ClauseExpr) -> String {
        match expr {
            ClauseExpr::Id(parts) => self.render_id(parts),
            ClauseExpr::Literal(lit) => self.render_literal(lit),
            ClauseExpr::Placeholder(name) => self.render_placeholder(name),
            ClauseExpr::Operator { name, args } => self.render_call(name, args),
            ClauseExpr::Function { name, args } => self.render_call(name, args),
            ClauseExpr::Window {
                func,
                partition_by,
                order_by,
                frame,
            } => self.render_window(func, partition_by, order_by, frame.as_ref()),
            ClauseExpr::Subquery(clause) => {
                format!("({})", super::gen_query::render_clause_compact(self, clause))
            }
        }
    }

    fn render_call(&mut self, name: &str, args: &[ClauseExpr]) -> String {
        let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
        if let Some(specialized) = render_specialized(self.dialect, name, &rendered_args) {
            return specialized;
        }
        if is_symbolic(name) {
            return match rendered_args.len() {
                1 => format!("{name}{}", rendered_args[0]),
                _ => format!("({})", rendered_args.join(&format!(" {name} "))),
            };
        }
        if let Some(templated) = render_template(name, &rendered_args) {
            return templated;
        }
        format!("{name}({})", rendered_args.join(", "))
    }

    fn render_window(
        &mut self,
        func: &ClauseExpr,
        partition_by: &[ClauseExpr],
        order_by: &[SortedExpr],
        frame: Option<&crate::ast::generic::WindowFrame<ClauseExpr>>,
    ) -> String {
        let func_sql = self.render_expr(func);
        let mut parts = Vec::new();
        if !partition_by.is_empty() {
            let keys: Vec<String> = partition_by.iter().map(|k| self.render_expr(k)).collect();
            parts.push(format!("PARTITION BY {}", keys.join(", ")));
        }
        if !order_by.is_empty() {
            let keys: Vec<String> = order_by.iter().map(|k| self.render_sorted(k)).collect();
            parts.push(format!("ORDER BY {}", keys.join(", ")));
        }
        if let Some(frame) = frame {
            if self.dialect.supports_window_frames() {
                parts.push(self.render_frame(frame));
            }
        }
        format!("{func_sql} OVER ({})", parts.join(" "))
    }

    fn render_frame(&mut self, frame: &crate::ast::generic::WindowFrame<ClauseExpr>) -> String {
        use crate::ast::generic::FrameMode;
        let mode = match frame.mode {
            FrameMode::Rows => "ROWS",
            FrameMode::Range => "RANGE",
            FrameMode::Groups => "GROUPS",
        };
        let bound = |edge: &Option<ClauseExpr>, preceding: bool| -> String {
            match edge {
                None => {
                    if preceding {
                        "UNBOUNDED PRECEDING".to_string()
                    } else {
                        "UNBOUNDED FOLLOWING".to_string()
                    }
                }
                Some(ClauseExpr::Literal(Literal::Integer(0))) => "CURRENT ROW".to_string(),
                Some(_) => String::new(),
            }
        };
        let start = match &frame.range.start {
            Some(ClauseExpr::Literal(Literal::Integer(0))) => "CURRENT ROW".to_string(),
            Some(e) => format!("{} PRECEDING", self.render_expr(e)),
            None => bound(&frame.range.start, true),
        };
        let end = match &frame.range.end {
            Some(ClauseExpr::Literal(Literal::Integer(0))) => "CURRENT ROW".to_string(),
            Some(e) => format!("{} FOLLOWING", self.render_expr(e)),
            None => bound(&frame.range.end, false),
        };
        format!("{mode} BETWEEN {start} AND {end}")
    }

    pub fn render_sorted(&mut self, sorted: &SortedExpr) -> String {
        use crate::ast::generic::{NullsOrder, SortDirection};
        let mut out = self.render_expr(&sorted.expr);
        out.push_str(match sorted.direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
        match sorted.nulls {
            NullsOrder::Default => {}
            NullsOrder::First => out.push_str(" NULLS FIRST"),
            NullsOrder::Last => out.push_str(" NULLS LAST"),
        }
        out
    }
}

fn is_symbolic(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.chars().all(|c| "+-*/%<>=!|&^~".contains(c))
        || name.starts_with(' ')
        || name.ends_with(' ')
}

/// Step 2 of the operator/function override cascade: a name containing a
/// `?` placeholder (with `??` as a literal `?`) is a template, substituting
/// each `?` with the next argument's rendering in order. Returns `None` for
/// names with no `?`, leaving them to the later steps of the cascade.
fn render_template(name: &str, rendered_args: &[String]) -> Option<String> {
    if !name.contains('?') {
        return None;
    }
    let mut out = String::with_capacity(name.len());
    let mut args = rendered_args.iter();
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '?' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'?') {
            chars.next();
            out.push('?');
            continue;
        }
        if let Some(arg) = args.next() {
            out.push_str(arg);
        }
    }
    if out.ends_with(')') {
        Some(out)
    } else {
        Some(format!("({out})"))
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", escape_single_quotes(s))
}

fn escape_single_quotes(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::{AnsiDialect, PostgresqlDialect};

    #[test]
    fn renders_qualified_id() {
        let writer = ExprWriter::new(&AnsiDialect);
        let got = writer.render_id(&["person_1".to_string(), "name".to_string()]);
        assert_eq!(got, "\"person_1\".\"name\"");
    }

    #[test]
    fn escapes_string_literal_quotes() {
        let writer = ExprWriter::new(&AnsiDialect);
        assert_eq!(
            writer.render_literal(&Literal::String("O'Brien".to_string())),
            "'O''Brien'"
        );
    }

    #[test]
    fn placeholders_get_stable_positions() {
        let mut writer = ExprWriter::new(&PostgresqlDialect);
        assert_eq!(writer.render_placeholder("min_age"), "$1");
        assert_eq!(writer.render_placeholder("max_age"), "$2");
        assert_eq!(writer.render_placeholder("min_age"), "$1");
        assert_eq!(writer.placeholders, vec!["min_age", "max_age"]);
    }

    #[test]
    fn infix_operator_renders_between_args() {
        let mut writer = ExprWriter::new(&AnsiDialect);
        let expr = ClauseExpr::Operator {
            name: "=".to_string(),
            args: vec![
                ClauseExpr::Id(vec!["t".to_string(), "a".to_string()]),
                ClauseExpr::Literal(Literal::Integer(1)),
            ],
        };
        assert_eq!(writer.render_expr(&expr), "(\"t\".\"a\" = 1)");
    }

    #[test]
    fn plain_call_falls_through_when_unrecognized() {
        let mut writer = ExprWriter::new(&AnsiDialect);
        let expr = ClauseExpr::Function {
            name: "upper".to_string(),
            args: vec![ClauseExpr::Id(vec!["t".to_string(), "name".to_string()])],
        };
        assert_eq!(writer.render_expr(&expr), "upper(\"t\".\"name\")");
    }
}
