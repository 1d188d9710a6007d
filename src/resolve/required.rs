//! Top-down required-column propagation (spec §4.3 second sweep): drives
//! column pruning in translation so that table columns never referenced
//! downstream are omitted from the generated SQL (spec §8, testable
//! property 2), while columns introduced by `Define` are always carried to
//! the nearest materialization boundary.
//!
//! CTEs and `Iterate` steps are resolved conservatively: every column they
//! themselves expose is treated as required, rather than narrowed further
//! by how the binding happens to be used at each reference site. This
//! keeps the pass a single straightforward walk; it costs a little pruning
//! precision inside those constructs, not correctness — property 2 only
//! promises pruning of what's unreachable from the root, and a CTE's own
//! columns are, by construction, reachable.

use std::collections::{HashMap, HashSet};

use crate::ast::rowtype::ColumnId;
use crate::ast::{Node, NodeId, NodeKind, ScalarKind, ScalarNode};

use super::Resolution;

pub fn compute_required(root: &Node, resolution: &mut Resolution) {
    let mut index = HashMap::new();
    build_index(root, &mut index);

    let root_required: HashSet<ColumnId> = resolution
        .row_types
        .get(&root.id)
        .map(|rt| rt.column_ids().into_iter().collect())
        .unwrap_or_default();
    propagate(root, root_required, resolution);

    // Route each aggregate's argument columns to its producer's input side,
    // independent of wherever in the tree the aggregate itself appears.
    let producers = resolution.producers.clone();
    for (agg_id, producer_id) in producers {
        let Some(refs) = resolution.agg_arg_refs.get(&agg_id).cloned() else {
            continue;
        };
        if let Some(producer_node) = index.get(&producer_id) {
            if let Some(child) = producer_node.over() {
                propagate(child, refs, resolution);
            }
        }
    }
}

fn build_index<'a>(node: &'a Node, index: &mut HashMap<NodeId, &'a Node>) {
    index.insert(node.id, node);
    if let Some(over) = node.over() {
        build_index(over, index);
    }
    match &node.kind {
        NodeKind::Join(spec) => build_index(&spec.right, index),
        NodeKind::Append(branches) => {
            for b in branches {
                build_index(b, index);
            }
        }
        NodeKind::With(ctes) => {
            for c in ctes {
                build_index(&c.body, index);
            }
        }
        NodeKind::Iterate(spec) => build_index(&spec.step, index),
        NodeKind::Bind(spec) => build_index(&spec.sub, index),
        _ => {}
    }
}

fn propagate(node: &Node, required_here: HashSet<ColumnId>, resolution: &mut Resolution) {
    resolution
        .required
        .entry(node.id)
        .or_default()
        .extend(required_here.iter().copied());

    match &node.kind {
        NodeKind::Select(items) | NodeKind::Define(items) => {
            let is_define = matches!(node.kind, NodeKind::Define(_));
            let fresh_ids: HashSet<ColumnId> = items
                .iter()
                .filter_map(|item| resolution.row_types.get(&node.id)?.get(&item.label))
                .filter_map(|slot| slot.as_column().copied())
                .collect();

            let mut child_required = if is_define {
                required_here
                    .iter()
                    .copied()
                    .filter(|id| !fresh_ids.contains(id))
                    .collect::<HashSet<_>>()
            } else {
                HashSet::new()
            };

            for item in items {
                let produced = resolution
                    .row_types
                    .get(&node.id)
                    .and_then(|rt| rt.get(&item.label))
                    .and_then(|slot| slot.as_column().copied());
                let wanted = match produced {
                    Some(id) => required_here.contains(&id),
                    None => true,
                };
                if wanted {
                    collect_non_agg_refs(&item.expr, resolution, &mut child_required);
                }
            }

            if let Some(over) = node.over() {
                propagate(over, child_required, resolution);
            }
        }

        NodeKind::Where(pred) => {
            let mut child_required = required_here;
            collect_non_agg_refs(pred, resolution, &mut child_required);
            if let Some(over) = node.over() {
                propagate(over, child_required, resolution);
            }
        }

        NodeKind::Join(spec) => {
            let left_ids: HashSet<ColumnId> = node
                .over()
                .and_then(|over| resolution.row_types.get(&over.id))
                .map(|rt| rt.column_ids().into_iter().collect())
                .unwrap_or_default();
            let right_ids: HashSet<ColumnId> = resolution
                .row_types
                .get(&spec.right.id)
                .map(|rt| rt.column_ids().into_iter().collect())
                .unwrap_or_default();

            let mut on_refs = HashSet::new();
            collect_non_agg_refs(&spec.on, resolution, &mut on_refs);

            let left_required: HashSet<ColumnId> = required_here
                .iter()
                .chain(on_refs.iter())
                .filter(|id| left_ids.contains(id))
                .copied()
                .collect();
            let right_required: HashSet<ColumnId> = required_here
                .iter()
                .chain(on_refs.iter())
                .filter(|id| right_ids.contains(id))
                .copied()
                .collect();

            if let Some(over) = node.over() {
                propagate(over, left_required, resolution);
            }
            propagate(&spec.right, right_required, resolution);
        }

        NodeKind::Group(keys) => {
            let mut child_required = HashSet::new();
            for key in keys {
                collect_non_agg_refs(key, resolution, &mut child_required);
            }
            if let Some(over) = node.over() {
                propagate(over, child_required, resolution);
            }
        }

        NodeKind::Partition(spec) => {
            let mut child_required = required_here;
            for key in &spec.keys {
                collect_non_agg_refs(key, resolution, &mut child_required);
            }
            for key in &spec.order {
                collect_non_agg_refs(key, resolution, &mut child_required);
            }
            if let Some(over) = node.over() {
                propagate(over, child_required, resolution);
            }
        }

        NodeKind::Order(keys) => {
            let mut child_required = required_here;
            for key in keys {
                collect_non_agg_refs(key, resolution, &mut child_required);
            }
            if let Some(over) = node.over() {
                propagate(over, child_required, resolution);
            }
        }

        NodeKind::Append(branches) => {
            let first_rt = node
                .over()
                .and_then(|over| resolution.row_types.get(&over.id));
            let labels: Vec<String> = first_rt
                .map(|rt| rt.labels().into_iter().map(str::to_string).collect())
                .unwrap_or_default();
            let produced_ids: Vec<ColumnId> = resolution
                .row_types
                .get(&node.id)
                .map(|rt| rt.column_ids())
                .unwrap_or_default();

            for (branch_index, branch) in
                std::iter::once(node.over()).chain(branches.iter().map(Some)).enumerate()
            {
                let Some(branch) = branch else { continue };
                let branch_rt = resolution.row_types.get(&branch.id);
                let mut branch_required = HashSet::new();
                for (label, &produced_id) in labels.iter().zip(produced_ids.iter()) {
                    if required_here.contains(&produced_id) {
                        if let Some(id) = branch_rt
                            .and_then(|rt| rt.get(label))
                            .and_then(|slot| slot.as_column().copied())
                        {
                            branch_required.insert(id);
                        }
                    }
                }
                let _ = branch_index;
                propagate(branch, branch_required, resolution);
            }
        }

        NodeKind::As(_) => {
            if let Some(over) = node.over() {
                propagate(over, required_here, resolution);
            }
        }

        NodeKind::With(ctes) => {
            for cte in ctes {
                let full: HashSet<ColumnId> = resolution
                    .row_types
                    .get(&cte.body.id)
                    .map(|rt| rt.column_ids().into_iter().collect())
                    .unwrap_or_default();
                propagate(&cte.body, full, resolution);
            }
            if let Some(over) = node.over() {
                propagate(over, required_here, resolution);
            }
        }

        NodeKind::Iterate(spec) => {
            let full: HashSet<ColumnId> = resolution
                .row_types
                .get(&spec.step.id)
                .map(|rt| rt.column_ids().into_iter().collect())
                .unwrap_or_default();
            propagate(&spec.step, full, resolution);
            if let Some(over) = node.over() {
                propagate(over, required_here, resolution);
            }
        }

        NodeKind::Bind(spec) => {
            propagate(&spec.sub, required_here, resolution);
        }

        NodeKind::From(_) | NodeKind::Limit(_) | NodeKind::WithExternal(_) => {
            if let Some(over) = node.over() {
                propagate(over, required_here, resolution);
            }
        }
    }
}

/// Collects column refs from everything except `Agg` arguments, which are
/// routed to their producer separately by [`compute_required`].
fn collect_non_agg_refs(scalar: &ScalarNode, resolution: &Resolution, out: &mut HashSet<ColumnId>) {
    match &scalar.kind {
        ScalarKind::Get(_) => {
            if let Some(id) = resolution.get_refs.get(&scalar.id) {
                out.insert(*id);
            }
        }
        ScalarKind::Fun { args, .. } => {
            for a in args {
                collect_non_agg_refs(a, resolution, out);
            }
        }
        ScalarKind::Sort { expr, .. } => collect_non_agg_refs(expr, resolution, out),
        ScalarKind::Agg { .. } => {
            // Intentionally skipped: handled via `agg_arg_refs`/`producers`.
        }
        ScalarKind::Lit(_) | ScalarKind::Var(_) => {}
    }
}
