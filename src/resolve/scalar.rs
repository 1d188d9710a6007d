//! Scalar resolution: `Get` path walking (with ambiguity detection) and
//! `Agg` producer binding (spec §4.3).

use std::collections::HashSet;

use crate::ast::rowtype::{ColumnId, RowType, Slot};
use crate::ast::{ScalarKind, ScalarNode};
use crate::error::{Error, ErrorKind, Result, WithErrorInfo};

use super::Resolution;

/// Resolves `scalar` against `scope` (the enclosing row-type) and, for
/// `Agg`, against `producer_input` (the nearest Group/Partition's
/// pre-aggregation row-type). Returns the `ColumnId` a bare `Get` resolves
/// to, so callers can decide whether to reuse it (passthrough) or mint a
/// fresh one.
pub fn resolve_scalar(
    scalar: &ScalarNode,
    scope: &RowType,
    producer: Option<(crate::ast::NodeId, &RowType)>,
    resolution: &mut Resolution,
) -> Result<Option<ColumnId>> {
    match &scalar.kind {
        ScalarKind::Lit(_) => Ok(None),
        ScalarKind::Var(_) => Ok(None),
        ScalarKind::Get(path) => {
            let id = resolve_path(scope, path, scalar.id)?;
            resolution.get_refs.insert(scalar.id, id);
            Ok(Some(id))
        }
        ScalarKind::Fun { args, .. } => {
            for arg in args {
                resolve_scalar(arg, scope, producer, resolution)?;
            }
            Ok(None)
        }
        ScalarKind::Agg { args, filter, .. } => {
            let (producer_id, input) = producer.ok_or_else(|| {
                Error::simple(
                    ErrorKind::AggWithoutGroup,
                    "aggregate used without an enclosing Group or Partition",
                )
                .with_node(scalar.id)
            })?;
            resolution.producers.insert(scalar.id, producer_id);

            let mut refs = HashSet::new();
            for arg in args {
                if let Some(id) = resolve_scalar(arg, input, None, resolution)? {
                    refs.insert(id);
                }
                collect_nested_refs(arg, input, &mut refs);
            }
            if let Some(f) = filter {
                if let Some(id) = resolve_scalar(f, input, None, resolution)? {
                    refs.insert(id);
                }
                collect_nested_refs(f, input, &mut refs);
            }
            resolution.agg_arg_refs.insert(scalar.id, refs);
            Ok(None)
        }
        ScalarKind::Sort { expr, .. } => resolve_scalar(expr, scope, producer, resolution),
    }
}

/// `resolve_scalar` only returns the id of a top-level `Get`; this walks
/// into `Fun` arguments (and further, nested `Agg`/`Sort`) to collect every
/// column an aggregate's argument tree touches, for the required-columns
/// pass.
fn collect_nested_refs(scalar: &ScalarNode, scope: &RowType, out: &mut HashSet<ColumnId>) {
    match &scalar.kind {
        ScalarKind::Get(path) => {
            if let Ok(id) = resolve_path(scope, path, scalar.id) {
                out.insert(id);
            }
        }
        ScalarKind::Fun { args, .. } => {
            for a in args {
                collect_nested_refs(a, scope, out);
            }
        }
        ScalarKind::Sort { expr, .. } => collect_nested_refs(expr, scope, out),
        ScalarKind::Agg { args, filter, .. } => {
            for a in args {
                collect_nested_refs(a, scope, out);
            }
            if let Some(f) = filter {
                collect_nested_refs(f, scope, out);
            }
        }
        ScalarKind::Lit(_) | ScalarKind::Var(_) => {}
    }
}

/// Walks a (possibly dotted) `Get` path through `row_type`, erroring on an
/// unresolved name or, for a single-segment path, an ambiguous one (spec
/// invariant 1: "a bare Get.name ... errors on ambiguity across Join
/// branches").
pub fn resolve_path(
    row_type: &RowType,
    path: &[String],
    node: crate::ast::NodeId,
) -> Result<ColumnId> {
    let (head, rest) = path
        .split_first()
        .expect("Get path must have at least one segment");

    let matches: Vec<&Slot> = row_type
        .slots
        .iter()
        .filter(|(label, _)| label == head)
        .map(|(_, slot)| slot)
        .collect();

    if matches.is_empty() {
        return Err(Error::new(
            ErrorKind::Unresolved,
            crate::error::Reason::NotFound {
                name: head.clone(),
                namespace: "column".to_string(),
            },
        )
        .with_node(node));
    }

    if matches.len() > 1 && rest.is_empty() {
        return Err(Error::new(
            ErrorKind::AmbiguousColumn,
            crate::error::Reason::Ambiguous {
                name: head.clone(),
                candidates: matches.iter().map(|_| head.clone()).collect(),
            },
        )
        .with_node(node));
    }

    let slot = matches[0];
    if rest.is_empty() {
        match slot {
            Slot::Column(id) => Ok(*id),
            Slot::Nested(_) => Err(Error::simple(
                ErrorKind::Unresolved,
                format!("`{head}` is a nested record, not a column"),
            )
            .with_node(node)),
        }
    } else {
        match slot {
            Slot::Nested(inner) => resolve_path(inner, rest, node),
            Slot::Column(_) => Err(Error::simple(
                ErrorKind::Unresolved,
                format!("`{head}` is a column, not a nested record"),
            )
            .with_node(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::rowtype::RowType;

    fn row_type(labels: &[&str]) -> RowType {
        let mut rt = RowType::new();
        for (i, label) in labels.iter().enumerate() {
            rt.push(*label, Slot::Column(ColumnId(i)));
        }
        rt
    }

    #[test]
    fn resolves_bare_get() {
        let rt = row_type(&["a", "b"]);
        let id = resolve_path(&rt, &["b".to_string()], crate::ast::NodeId(0)).unwrap();
        assert_eq!(id, ColumnId(1));
    }

    #[test]
    fn errors_on_unresolved() {
        let rt = row_type(&["a"]);
        let err = resolve_path(&rt, &["z".to_string()], crate::ast::NodeId(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unresolved);
    }

    #[test]
    fn errors_on_ambiguous() {
        let mut rt = RowType::new();
        rt.slots.push(("x".to_string(), Slot::Column(ColumnId(0))));
        rt.slots.push(("x".to_string(), Slot::Column(ColumnId(1))));
        let err = resolve_path(&rt, &["x".to_string()], crate::ast::NodeId(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AmbiguousColumn);
    }

    #[test]
    fn walks_nested_path() {
        let inner = row_type(&["location_id"]);
        let mut outer = RowType::new();
        outer.push("location", Slot::Nested(inner));
        let id = resolve_path(
            &outer,
            &["location".to_string(), "location_id".to_string()],
            crate::ast::NodeId(0),
        )
        .unwrap();
        assert_eq!(id, ColumnId(0));
    }
}
