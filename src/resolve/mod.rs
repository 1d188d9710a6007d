//! Resolution pass (spec §4.3): bottom-up row-type derivation plus top-down
//! required-column propagation.
//!
//! Grounded on the teacher's `semantic::resolver`/`semantic::frame` split
//! between "what does this node expose" (its frame/row-type) and "which of
//! those columns actually make it into the final query" (the teacher's
//! `Frame` column-pruning during `semantic::lowering`), adapted onto this
//! spec's explicit upward/downward two-sweep description.

mod required;
mod scalar;

use std::collections::HashMap;

use crate::ast::rowtype::{ColumnId, RowType, Slot};
use crate::ast::{
    BindSpec, FromSource, IterateSpec, JoinSpec, Materialized, Node, NodeId, NodeKind,
    PartitionSpec,
};
use crate::catalog::Catalog;
use crate::error::{Error, ErrorKind, Result, WithErrorInfo};
use crate::utils::IdGenerator;

pub use required::compute_required;
use scalar::resolve_scalar;

/// Everything the resolution pass learns about a tree, keyed by [`NodeId`].
#[derive(Debug, Default)]
pub struct Resolution {
    pub row_types: HashMap<NodeId, RowType>,
    /// Columns of each node actually required by what consumes it,
    /// populated by [`compute_required`] after the upward pass.
    pub required: HashMap<NodeId, std::collections::HashSet<ColumnId>>,
    /// Maps an `Agg` scalar node to the `Group`/`Partition` node it binds
    /// to (spec §4.3 "aggregates are tied to their Group/Partition by
    /// walking up to the nearest producer").
    pub producers: HashMap<NodeId, NodeId>,
    /// The row-type an `Agg`'s arguments are resolved against: the
    /// producer's *input*, not its (post-aggregation) output.
    pub producer_inputs: HashMap<NodeId, RowType>,
    /// Column ids read by each `Agg`'s arguments/filter, cached so the
    /// required-columns pass can route them to the producer's child
    /// without re-walking scalar trees.
    pub agg_arg_refs: HashMap<NodeId, std::collections::HashSet<ColumnId>>,
    /// The column id each `Get` scalar resolved to, cached so the
    /// required-columns pass can look it up without re-walking row-types.
    pub get_refs: HashMap<NodeId, ColumnId>,
    /// Row-types of `WithExternal` bindings, keyed by CTE name. These have
    /// no body `Node`/`NodeId` to hang a `row_types` entry off, so they are
    /// recorded separately for translation to recover the column ids it
    /// assigned.
    pub external_cte_row_types: HashMap<String, RowType>,
}

struct Ctx<'a> {
    catalog: &'a Catalog,
    ids: IdGenerator<ColumnId>,
    ctes: HashMap<String, RowType>,
    previous: Option<RowType>,
    /// Row-types of enclosing scopes a `Bind`'s parameter scalars may
    /// correlate against, outermost first.
    correlation_stack: Vec<RowType>,
}

/// Runs the resolution pass over `root`, returning the computed
/// [`Resolution`] or the first error encountered.
pub fn resolve(root: &Node, catalog: &Catalog) -> Result<Resolution> {
    let mut ctx = Ctx {
        catalog,
        ids: IdGenerator::new(),
        ctes: HashMap::new(),
        previous: None,
        correlation_stack: Vec::new(),
    };
    let mut resolution = Resolution::default();
    resolve_node(root, &mut ctx, &mut resolution)?;
    compute_required(root, &mut resolution);
    Ok(resolution)
}

/// Finds the nearest `Group`/`Partition` ancestor of `node` by walking its
/// `over` chain (spec §4.3: aggregates bind to the *nearest* producer).
fn find_producer(node: &Node) -> Option<NodeId> {
    let mut cur = node.over();
    while let Some(n) = cur {
        match &n.kind {
            NodeKind::Group(_) | NodeKind::Partition(_) => return Some(n.id),
            _ => cur = n.over(),
        }
    }
    None
}

fn resolve_node(node: &Node, ctx: &mut Ctx, resolution: &mut Resolution) -> Result<RowType> {
    // `With`/`WithExternal` must register their bindings *before* the
    // pipeline they sit over is resolved — that pipeline is exactly what is
    // expected to reference the newly bound names — so these two variants
    // are special-cased ahead of the generic bottom-up preamble below.
    match &node.kind {
        NodeKind::With(ctes) => {
            for cte in ctes {
                let body_rt = resolve_node(&cte.body, ctx, resolution)?;
                ctx.ctes.insert(cte.name.clone(), body_rt);
            }
            let rt = match node.over() {
                Some(over) => resolve_node(over, ctx, resolution)?,
                None => RowType::new(),
            };
            resolution.row_types.insert(node.id, rt.clone());
            return Ok(rt);
        }
        NodeKind::WithExternal(ctes) => {
            for cte in ctes {
                let mut rt = RowType::new();
                for col in &cte.columns {
                    rt.push(col.clone(), Slot::Column(ctx.ids.gen()));
                }
                resolution
                    .external_cte_row_types
                    .insert(cte.name.clone(), rt.clone());
                ctx.ctes.insert(cte.name.clone(), rt);
            }
            let rt = match node.over() {
                Some(over) => resolve_node(over, ctx, resolution)?,
                None => RowType::new(),
            };
            resolution.row_types.insert(node.id, rt.clone());
            return Ok(rt);
        }
        _ => {}
    }

    let child_rt = match node.over() {
        Some(over) => resolve_node(over, ctx, resolution)?,
        None => RowType::new(),
    };

    let rt = match &node.kind {
        NodeKind::From(source) => resolve_from(source, node.id, ctx)?,

        NodeKind::Select(items) => {
            let producer_input = producer_input_for(node, resolution);
            let mut rt = RowType::new();
            for item in items {
                let id = resolve_item(
                    &item.expr,
                    &child_rt,
                    producer_input.as_ref().map(|(id, rt)| (*id, rt)),
                    ctx,
                    resolution,
                )?;
                rt.push(item.label.clone(), Slot::Column(id));
            }
            rt
        }

        NodeKind::Define(items) => {
            let producer_input = producer_input_for(node, resolution);
            let mut rt = child_rt.clone();
            for item in items {
                let id = resolve_item(
                    &item.expr,
                    &child_rt,
                    producer_input.as_ref().map(|(id, rt)| (*id, rt)),
                    ctx,
                    resolution,
                )?;
                rt.push(item.label.clone(), Slot::Column(id));
            }
            rt
        }

        NodeKind::Where(pred) => {
            let producer_input = producer_input_for(node, resolution);
            resolve_scalar(pred, &child_rt, producer_input.as_ref().map(|(id, rt)| (*id, rt)), resolution)?;
            child_rt
        }

        NodeKind::Join(spec) => resolve_join(spec, child_rt, ctx, resolution)?,

        NodeKind::Group(keys) => {
            let mut rt = RowType::new();
            for (i, key) in keys.iter().enumerate() {
                let resolved = resolve_scalar(key, &child_rt, None, resolution)?;
                let id = passthrough_or_fresh(key, resolved, ctx);
                rt.push(key_label(key, i), Slot::Column(id));
            }
            resolution.producer_inputs.insert(node.id, child_rt);
            rt
        }

        NodeKind::Partition(spec) => {
            resolve_partition_keys(spec, &child_rt, resolution)?;
            resolution
                .producer_inputs
                .insert(node.id, child_rt.clone());
            child_rt
        }

        NodeKind::Order(keys) => {
            let producer_input = producer_input_for(node, resolution);
            for key in keys {
                resolve_scalar(key, &child_rt, producer_input.as_ref().map(|(id, rt)| (*id, rt)), resolution)?;
            }
            child_rt
        }

        NodeKind::Limit(_) => child_rt,

        NodeKind::Append(branches) => resolve_append(node.id, child_rt, branches, ctx, resolution)?,

        NodeKind::As(name) => {
            let mut rt = RowType::new();
            rt.push(name.clone(), Slot::Nested(child_rt));
            rt
        }

        NodeKind::With(_) | NodeKind::WithExternal(_) => {
            unreachable!("handled by the early return above")
        }

        NodeKind::Iterate(spec) => resolve_iterate(node.id, child_rt, spec, ctx, resolution)?,

        NodeKind::Bind(spec) => resolve_bind(spec, ctx, resolution)?,
    };

    resolution.row_types.insert(node.id, rt.clone());
    Ok(rt)
}

fn producer_input_for(node: &Node, resolution: &Resolution) -> Option<(NodeId, RowType)> {
    find_producer(node).and_then(|p| {
        resolution
            .producer_inputs
            .get(&p)
            .cloned()
            .map(|rt| (p, rt))
    })
}

/// Resolves a `Select`/`Define` item, reusing the child's column id for a
/// bare passthrough `Get` and minting a fresh id for anything computed.
fn resolve_item(
    expr: &crate::ast::ScalarNode,
    scope: &RowType,
    producer: Option<(NodeId, &RowType)>,
    ctx: &mut Ctx,
    resolution: &mut Resolution,
) -> Result<ColumnId> {
    let resolved = resolve_scalar(expr, scope, producer, resolution)?;
    Ok(passthrough_or_fresh(expr, resolved, ctx))
}

fn passthrough_or_fresh(
    expr: &crate::ast::ScalarNode,
    resolved: Option<ColumnId>,
    ctx: &mut Ctx,
) -> ColumnId {
    match (&expr.kind, resolved) {
        (crate::ast::ScalarKind::Get(_), Some(id)) => id,
        _ => ctx.ids.gen(),
    }
}

fn key_label(key: &crate::ast::ScalarNode, index: usize) -> String {
    match &key.kind {
        crate::ast::ScalarKind::Get(path) => path.last().cloned().unwrap_or_default(),
        crate::ast::ScalarKind::Sort { expr, .. } => key_label(expr, index),
        _ => format!("_group_{index}"),
    }
}

fn resolve_from(source: &FromSource, node: NodeId, ctx: &mut Ctx) -> Result<RowType> {
    match source {
        FromSource::Table(table_ref) => {
            let entry = match &table_ref.schema {
                Some(schema) => ctx.catalog.lookup_qualified(Some(schema), &table_ref.name),
                None => ctx.catalog.lookup(&table_ref.name).map(|(_, e)| e),
            };
            let entry = entry.ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownTable,
                    crate::error::Reason::NotFound {
                        name: table_ref.name.clone(),
                        namespace: "table".to_string(),
                    },
                )
                .with_node(node)
            })?;
            Ok(row_type_from_columns(&entry.columns, ctx))
        }
        FromSource::Nothing => Ok(RowType::new()),
        FromSource::InlineRows(inline) => {
            if inline.rows.iter().any(|row| row.len() != inline.columns.len()) {
                return Err(Error::simple(
                    ErrorKind::InvalidFrame,
                    "inline table row arity does not match its column list",
                )
                .with_node(node));
            }
            Ok(row_type_from_columns(&inline.columns, ctx))
        }
        FromSource::Ref(name) => {
            if let Some(rt) = ctx.ctes.get(name) {
                return Ok(rt.clone());
            }
            let (_, entry) = ctx.catalog.lookup(name).ok_or_else(|| {
                Error::new(
                    ErrorKind::UnknownTable,
                    crate::error::Reason::NotFound {
                        name: name.clone(),
                        namespace: "table or CTE".to_string(),
                    },
                )
                .with_node(node)
            })?;
            Ok(row_type_from_columns(&entry.columns, ctx))
        }
        FromSource::Previous => ctx.previous.clone().ok_or_else(|| {
            Error::simple(
                ErrorKind::CyclicIteration,
                "`From(^)` used outside an `Iterate` step",
            )
            .with_node(node)
        }),
    }
}

fn row_type_from_columns(columns: &[String], ctx: &mut Ctx) -> RowType {
    let mut rt = RowType::new();
    for col in columns {
        rt.push(col.clone(), Slot::Column(ctx.ids.gen()));
    }
    rt
}

fn resolve_join(
    spec: &JoinSpec,
    left_rt: RowType,
    ctx: &mut Ctx,
    resolution: &mut Resolution,
) -> Result<RowType> {
    ctx.correlation_stack.push(left_rt.clone());
    let right_rt = resolve_node(&spec.right, ctx, resolution);
    ctx.correlation_stack.pop();
    let right_rt = right_rt?;

    // The `on` predicate sees both sides concatenated.
    let mut combined = left_rt.clone();
    combined.slots.extend(right_rt.slots.iter().cloned());
    resolve_scalar(&spec.on, &combined, None, resolution)?;

    Ok(combined)
}

fn resolve_partition_keys(
    spec: &PartitionSpec,
    scope: &RowType,
    resolution: &mut Resolution,
) -> Result<()> {
    for key in &spec.keys {
        resolve_scalar(key, scope, None, resolution)?;
    }
    for key in &spec.order {
        resolve_scalar(key, scope, None, resolution)?;
    }
    Ok(())
}

fn resolve_append(
    node_id: NodeId,
    first: RowType,
    branches: &[Node],
    ctx: &mut Ctx,
    resolution: &mut Resolution,
) -> Result<RowType> {
    let mut branch_rts = vec![first];
    for branch in branches {
        branch_rts.push(resolve_node(branch, ctx, resolution)?);
    }
    if branch_rts.iter().all(|rt| rt.slots.is_empty()) {
        return Err(Error::simple(
            ErrorKind::Unresolved,
            "Append requires at least one branch exposing columns",
        )
        .with_node(node_id));
    }
    let mut rt = RowType::new();
    for (label, _) in &branch_rts[0].slots {
        if branch_rts.iter().all(|b| b.get(label).is_some()) {
            rt.push(label.clone(), Slot::Column(ctx.ids.gen()));
        }
    }
    Ok(rt)
}

fn resolve_iterate(
    node_id: NodeId,
    base_rt: RowType,
    spec: &IterateSpec,
    ctx: &mut Ctx,
    resolution: &mut Resolution,
) -> Result<RowType> {
    let saved = ctx.previous.take();
    ctx.previous = Some(base_rt.clone());
    let step_rt = resolve_node(&spec.step, ctx, resolution);
    ctx.previous = saved;
    let step_rt = step_rt?;

    let missing: Vec<&str> = base_rt
        .labels()
        .into_iter()
        .filter(|l| step_rt.get(l).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(Error::simple(
            ErrorKind::CyclicIteration,
            format!(
                "Iterate step does not expose base column(s): {}",
                missing.join(", ")
            ),
        )
        .with_node(node_id));
    }

    let previous_refs = count_previous(&spec.step);
    if previous_refs > 1 {
        return Err(Error::simple(
            ErrorKind::CyclicIteration,
            "`From(^)` may appear at most once inside an Iterate step",
        )
        .with_node(node_id));
    }

    Ok(base_rt)
}

fn count_previous(node: &Node) -> usize {
    let mut count = match &node.kind {
        NodeKind::From(FromSource::Previous) => 1,
        NodeKind::Join(spec) => count_previous(&spec.right),
        NodeKind::Append(branches) => branches.iter().map(count_previous).sum(),
        NodeKind::With(ctes) => ctes.iter().map(|c| count_previous(&c.body)).sum(),
        NodeKind::Bind(spec) => count_previous(&spec.sub),
        _ => 0,
    };
    if let Some(over) = node.over() {
        count += count_previous(over);
    }
    count
}

fn resolve_bind(spec: &BindSpec, ctx: &mut Ctx, resolution: &mut Resolution) -> Result<RowType> {
    let outer_scope = ctx
        .correlation_stack
        .last()
        .cloned()
        .unwrap_or_default();
    for (_, value) in &spec.params {
        resolve_scalar(value, &outer_scope, None, resolution)?;
    }

    let mut used = std::collections::HashSet::new();
    collect_vars(&spec.sub, &mut used);
    for name in &used {
        if !spec.params.iter().any(|(n, _)| n == name) {
            return Err(Error::new(
                ErrorKind::InvalidBind,
                crate::error::Reason::NotFound {
                    name: name.clone(),
                    namespace: "bind parameter".to_string(),
                },
            )
            .with_node(spec.sub.id));
        }
    }

    resolve_node(&spec.sub, ctx, resolution)
}

fn collect_vars(node: &Node, out: &mut std::collections::HashSet<String>) {
    collect_vars_kind(&node.kind, out);
    if let Some(over) = node.over() {
        collect_vars(over, out);
    }
}

fn collect_vars_kind(kind: &NodeKind, out: &mut std::collections::HashSet<String>) {
    use crate::ast::ScalarNode;
    fn scalar(s: &ScalarNode, out: &mut std::collections::HashSet<String>) {
        match &s.kind {
            crate::ast::ScalarKind::Var(name) => {
                out.insert(name.clone());
            }
            crate::ast::ScalarKind::Fun { args, .. } => {
                for a in args {
                    scalar(a, out);
                }
            }
            crate::ast::ScalarKind::Agg { args, filter, .. } => {
                for a in args {
                    scalar(a, out);
                }
                if let Some(f) = filter {
                    scalar(f, out);
                }
            }
            crate::ast::ScalarKind::Sort { expr, .. } => scalar(expr, out),
            crate::ast::ScalarKind::Lit(_) | crate::ast::ScalarKind::Get(_) => {}
        }
    }

    match kind {
        NodeKind::Select(items) | NodeKind::Define(items) => {
            for item in items {
                scalar(&item.expr, out);
            }
        }
        NodeKind::Where(p) => scalar(p, out),
        NodeKind::Join(j) => {
            scalar(&j.on, out);
            collect_vars(&j.right, out);
        }
        NodeKind::Group(keys) | NodeKind::Order(keys) => {
            for k in keys {
                scalar(k, out);
            }
        }
        NodeKind::Partition(p) => {
            for k in &p.keys {
                scalar(k, out);
            }
            for o in &p.order {
                scalar(o, out);
            }
        }
        NodeKind::Append(branches) => {
            for b in branches {
                collect_vars(b, out);
            }
        }
        NodeKind::With(ctes) => {
            for c in ctes {
                collect_vars(&c.body, out);
            }
        }
        NodeKind::Iterate(it) => collect_vars(&it.step, out),
        // A nested Bind owns its own parameter scope; its body is resolved
        // independently when the tree walk reaches that Bind node.
        NodeKind::Bind(_) => {}
        NodeKind::From(_)
        | NodeKind::Limit(_)
        | NodeKind::As(_)
        | NodeKind::WithExternal(_) => {}
    }
}

/// Used by the `Materialized` default when a cte binding doesn't specify
/// one explicitly (re-exported here since `resolve` is the first consumer).
pub fn default_materialized() -> Materialized {
    Materialized::Default
}
