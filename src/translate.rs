//! Translation pass (spec §4.4): lowers the semantic tree into the clause
//! tree, deciding subquery boundaries as it goes.
//!
//! The spec describes translation and assembly as two passes: local
//! lowering rules, then a separate flattening/CTE-promotion walk. Grounded
//! on the teacher's `sql::pq::gen_query`/`sql::pq::anchor` split, we merge
//! the two into a single bottom-up walk that maintains an *open* SELECT
//! accumulator (`Frame`) and decides, at each node, whether the node's
//! effect fits in the open frame or forces it closed into a materialized
//! subquery first — the same "does this fit in one atomic SELECT" question
//! `anchor::extract_atomic` answers, just resolved eagerly instead of by
//! splitting a flat transform list afterwards.

use std::collections::{HashMap, HashSet};

use crate::ast::generic::{NullsOrder, Range, SortDirection, WindowFrame};
use crate::ast::rowtype::{ColumnId, Slot};
use crate::ast::{
    BindSpec, FromSource, JoinSpec, Literal, Materialized, Node, NodeId, NodeKind, PartitionSpec,
    ScalarKind, ScalarNode,
};
use crate::catalog::Catalog;
use crate::error::{Error, ErrorKind, Result, WithErrorInfo};
use crate::plan::{Clause, ClauseExpr, CteClause, JoinKind, Projection, SortedExpr};
use crate::resolve::Resolution;
use crate::sql::dialect::DialectHandler;
use crate::utils::{toposort, NameGenerator};

/// Translates `root` into a clause tree plus the ordered output column
/// labels (spec §3 Row-type, flattened for the final `SELECT`).
pub fn translate(
    root: &Node,
    resolution: &Resolution,
    catalog: &Catalog,
    dialect: &dyn DialectHandler,
) -> Result<(Clause, Vec<String>)> {
    let mut t = Translator {
        resolution,
        catalog,
        dialect,
        names: HashMap::new(),
        ctes: HashMap::new(),
        pending_ctes: Vec::new(),
        used_ctes: HashSet::new(),
        define_use_count: HashMap::new(),
        var_bindings: Vec::new(),
        window_specs: HashMap::new(),
        previous: Vec::new(),
    };
    t.count_define_uses(root);

    let frame = t.translate_node(root)?;
    let clause = t.finalize_select(frame, root.id)?;
    let clause = t.attach_ctes(clause)?;

    let labels = resolution
        .row_types
        .get(&root.id)
        .map(|rt| rt.labels().into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    Ok((clause, labels))
}

/// A window specification captured at a `Partition` node, consulted when an
/// `Agg` whose producer is that node is lowered (spec §3: "a window-
/// aggregate is simply an Agg applied over a Partition scope").
#[derive(Debug, Clone)]
struct WindowSpec {
    partition_by: Vec<ClauseExpr>,
    order_by: Vec<SortedExpr>,
    frame: Option<WindowFrame<ClauseExpr>>,
}

/// Columns exposed by a `With`/`Iterate` binding, keyed by CTE name.
#[derive(Debug, Clone)]
struct CteScope {
    columns: Vec<(String, ColumnId)>,
}

/// The open SELECT accumulator. Carries everything translated so far for
/// the current subquery level; `flush` closes it into a materialized
/// derived table and starts a fresh one layered on top.
struct Frame {
    base: Clause,
    /// How to compute each currently-visible column, by id. Before a
    /// materialization boundary this may hold arbitrary computed
    /// expressions (Define); after one, every entry is a plain `Id`
    /// reference into the new derived table's alias.
    col_source: HashMap<ColumnId, ClauseExpr>,
    wheres: Vec<ClauseExpr>,
    group_keys: Option<Vec<ClauseExpr>>,
    /// The `Group`/`Partition` node id that produced `group_keys`, used to
    /// detect "`Group()` right after a `Group`" (spec invariant: DISTINCT).
    group_node_id: Option<NodeId>,
    havings: Vec<ClauseExpr>,
    projections: Option<Vec<Projection>>,
    distinct: bool,
    order: Vec<SortedExpr>,
    limit: Option<(u64, u64)>,
}

impl Frame {
    fn empty() -> Self {
        Frame {
            base: Clause::Raw(String::new()),
            col_source: HashMap::new(),
            wheres: Vec::new(),
            group_keys: None,
            group_node_id: None,
            havings: Vec::new(),
            projections: None,
            distinct: false,
            order: Vec::new(),
            limit: None,
        }
    }

    /// True once nothing further can be folded into this frame without
    /// first materializing it (spec §4.5: a `SELECT` absorbs what precedes
    /// it only "with no Group/Partition/Limit between").
    fn is_closed(&self) -> bool {
        self.projections.is_some() || !self.order.is_empty() || self.limit.is_some()
    }
}

struct Translator<'a> {
    resolution: &'a Resolution,
    catalog: &'a Catalog,
    dialect: &'a dyn DialectHandler,
    names: HashMap<String, NameGenerator>,
    ctes: HashMap<String, CteScope>,
    pending_ctes: Vec<CteClause>,
    used_ctes: HashSet<String>,
    /// Global count of `Get` occurrences resolving to each column id,
    /// used by `Define` to decide whether a computed column needs hoisting
    /// (spec §9 Open Question: hoist "whenever the defined column is
    /// referenced in more than one downstream clause").
    define_use_count: HashMap<ColumnId, usize>,
    /// Stack of `Bind` parameter substitutions, innermost last.
    var_bindings: Vec<HashMap<String, ClauseExpr>>,
    window_specs: HashMap<NodeId, WindowSpec>,
    /// Stack of the enclosing `Iterate`'s CTE alias, innermost last —
    /// consulted by `translate_from`'s `FromSource::Previous` arm so
    /// `From(^)` inside a step resolves to that CTE rather than erroring.
    previous: Vec<String>,
}

impl<'a> Translator<'a> {
    fn alias_for(&mut self, prefix: &str) -> String {
        self.names
            .entry(prefix.to_string())
            .or_insert_with(|| NameGenerator::new(prefix))
            .gen()
    }

    fn count_define_uses(&mut self, node: &Node) {
        for (_, id) in self.resolution.get_refs.iter() {
            *self.define_use_count.entry(*id).or_insert(0) += 1;
        }
        let _ = node;
    }

    // -- tree walk ---------------------------------------------------

    fn translate_node(&mut self, node: &Node) -> Result<Frame> {
        // `With`/`WithExternal` must register their bindings *before* the
        // pipeline they sit over is translated — that pipeline is exactly
        // what is expected to reference the newly bound names — so these
        // two variants bypass the generic bottom-up recursion below.
        match &node.kind {
            NodeKind::With(ctes) => {
                self.register_with_ctes(ctes)?;
                return match node.over() {
                    Some(over) => self.translate_node(over),
                    None => Ok(Frame::empty()),
                };
            }
            NodeKind::WithExternal(ctes) => {
                self.register_external_ctes(ctes);
                return match node.over() {
                    Some(over) => self.translate_node(over),
                    None => Ok(Frame::empty()),
                };
            }
            _ => {}
        }

        let frame = match node.over() {
            Some(over) => self.translate_node(over)?,
            None => Frame::empty(),
        };

        match &node.kind {
            NodeKind::From(source) => self.translate_from(source, node),
            NodeKind::Select(items) => self.translate_select(frame, node, items),
            NodeKind::Define(items) => self.translate_define(frame, node, items),
            NodeKind::Where(pred) => self.translate_where(frame, node, pred),
            NodeKind::Join(spec) => self.translate_join(frame, node, spec),
            NodeKind::Group(keys) => self.translate_group(frame, node, keys),
            NodeKind::Partition(spec) => self.translate_partition(frame, node, spec),
            NodeKind::Order(keys) => self.translate_order(frame, node, keys),
            NodeKind::Limit(spec) => {
                let mut frame = frame;
                if frame.limit.is_some() {
                    frame = self.flush(frame, node.over().unwrap().id)?;
                }
                frame.limit = Some(spec.offset_count());
                Ok(frame)
            }
            NodeKind::Append(branches) => self.translate_append(node, branches),
            NodeKind::As(_) => Ok(frame),
            NodeKind::With(_) | NodeKind::WithExternal(_) => {
                unreachable!("handled by the early return above")
            }
            NodeKind::Iterate(spec) => self.translate_iterate(frame, node, spec),
            NodeKind::Bind(spec) => self.translate_bind(spec),
        }
    }

    fn translate_from(&mut self, source: &FromSource, node: &Node) -> Result<Frame> {
        match source {
            FromSource::Table(table_ref) => {
                let alias = self.alias_for(&table_ref.name);
                let id_clause = Clause::id(table_ref.schema.clone(), table_ref.name.clone());
                let base = Clause::From(Box::new(Clause::As {
                    over: Box::new(id_clause),
                    alias: alias.clone(),
                    columns: None,
                }));
                let col_source = self.map_columns(node, &alias);
                Ok(Frame {
                    base,
                    col_source,
                    ..Frame::empty()
                })
            }
            FromSource::Nothing => Ok(Frame::empty()),
            FromSource::InlineRows(inline) => {
                let alias = self.alias_for("values");
                let values = Clause::Values {
                    columns: inline.columns.clone(),
                    rows: inline.rows.clone(),
                };
                let base = Clause::From(Box::new(Clause::As {
                    over: Box::new(values),
                    alias: alias.clone(),
                    columns: Some(inline.columns.clone()),
                }));
                let col_source = self.map_columns(node, &alias);
                Ok(Frame {
                    base,
                    col_source,
                    ..Frame::empty()
                })
            }
            FromSource::Ref(name) => {
                if let Some(scope) = self.ctes.get(name).cloned() {
                    self.used_ctes.insert(name.clone());
                    let base = Clause::From(Box::new(Clause::Ref(name.clone())));
                    let col_source = scope
                        .columns
                        .iter()
                        .map(|(label, id)| (*id, ClauseExpr::Id(vec![name.clone(), label.clone()])))
                        .collect();
                    Ok(Frame {
                        base,
                        col_source,
                        ..Frame::empty()
                    })
                } else {
                    let alias = self.alias_for(name);
                    let base = Clause::From(Box::new(Clause::As {
                        over: Box::new(Clause::id(None::<String>, name.clone())),
                        alias: alias.clone(),
                        columns: None,
                    }));
                    let col_source = self.map_columns(node, &alias);
                    Ok(Frame {
                        base,
                        col_source,
                        ..Frame::empty()
                    })
                }
            }
            FromSource::Previous => {
                let Some(alias) = self.previous.last().cloned() else {
                    return Err(Error::simple(
                        ErrorKind::CyclicIteration,
                        "`From(^)` translated outside an Iterate step",
                    )
                    .with_node(node.id));
                };
                let scope = self
                    .ctes
                    .get(&alias)
                    .cloned()
                    .expect("Iterate registers its alias before translating the step");
                self.used_ctes.insert(alias.clone());
                let base = Clause::From(Box::new(Clause::Ref(alias.clone())));
                let col_source = scope
                    .columns
                    .iter()
                    .map(|(label, id)| (*id, ClauseExpr::Id(vec![alias.clone(), label.clone()])))
                    .collect();
                Ok(Frame {
                    base,
                    col_source,
                    ..Frame::empty()
                })
            }
        }
    }

    /// Maps `node`'s resolved row-type columns to `alias.label` references,
    /// flattening any nested (`As`-wrapped) slots to their innermost label.
    fn map_columns(&self, node: &Node, alias: &str) -> HashMap<ColumnId, ClauseExpr> {
        let mut out = HashMap::new();
        if let Some(rt) = self.resolution.row_types.get(&node.id) {
            flatten_row_type(rt, alias, &mut out);
        }
        out
    }

    fn translate_select(
        &mut self,
        mut frame: Frame,
        node: &Node,
        items: &[crate::ast::Labeled],
    ) -> Result<Frame> {
        let over_id = node.over().map(|o| o.id);
        if frame.is_closed() {
            frame = self.flush(frame, over_id.expect("Select always layers over a pipeline"))?;
        }
        let mut dedup: HashMap<String, ClauseExpr> = HashMap::new();
        let mut projections = Vec::with_capacity(items.len());
        for item in items {
            let expr = self.lower_labeled(&item.expr, &frame.col_source, &mut dedup)?;
            if let Some(id) = self.produced_column(node.id, &item.label) {
                frame.col_source.insert(id, expr.clone());
            }
            projections.push(Projection {
                label: item.label.clone(),
                expr,
            });
        }
        frame.projections = Some(projections);
        frame.distinct = false;
        Ok(frame)
    }

    fn translate_define(
        &mut self,
        mut frame: Frame,
        node: &Node,
        items: &[crate::ast::Labeled],
    ) -> Result<Frame> {
        let over_id = node.over().map(|o| o.id);
        if frame.is_closed() {
            frame = self.flush(frame, over_id.expect("Define always layers over a pipeline"))?;
        }
        let mut dedup: HashMap<String, ClauseExpr> = HashMap::new();
        let mut must_hoist = false;
        for item in items {
            let expr = self.lower_labeled(&item.expr, &frame.col_source, &mut dedup)?;
            if let Some(id) = self.produced_column(node.id, &item.label) {
                if self.define_use_count.get(&id).copied().unwrap_or(0) >= 2 {
                    must_hoist = true;
                }
                frame.col_source.insert(id, expr);
            }
        }
        if must_hoist {
            frame = self.flush(frame, node.id)?;
        }
        Ok(frame)
    }

    fn translate_where(
        &mut self,
        mut frame: Frame,
        node: &Node,
        pred: &ScalarNode,
    ) -> Result<Frame> {
        if frame.is_closed() {
            let over_id = node.over().expect("Where always layers over a pipeline").id;
            frame = self.flush(frame, over_id)?;
        }
        let mut dedup = HashMap::new();
        let cond = self.lower_labeled(pred, &frame.col_source, &mut dedup)?;
        if frame.group_keys.is_some() {
            frame.havings.push(cond);
        } else {
            frame.wheres.push(cond);
        }
        Ok(frame)
    }

    fn translate_join(&mut self, mut frame: Frame, node: &Node, spec: &JoinSpec) -> Result<Frame> {
        let over_id = node.over().expect("Join always layers over a pipeline").id;
        if frame.is_closed() {
            frame = self.flush(frame, over_id)?;
        }

        if spec.optional {
            let required = self
                .resolution
                .required
                .get(&spec.right.id)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if !required {
                return Ok(frame);
            }
        }

        let right_frame = self.translate_node(&spec.right)?;
        let (right_clause, right_cols) = if right_frame.is_closed()
            || !right_frame.wheres.is_empty()
            || right_frame.group_keys.is_some()
        {
            let flushed = self.flush(right_frame, spec.right.id)?;
            (flushed.base, flushed.col_source)
        } else {
            (right_frame.base, right_frame.col_source)
        };

        let mut combined = frame.col_source.clone();
        combined.extend(right_cols);
        let mut dedup = HashMap::new();
        let on = self.lower_labeled(&spec.on, &combined, &mut dedup)?;

        let is_bind = matches!(spec.right.kind, NodeKind::Bind(_));
        let kind = match (is_bind, spec.left_outer) {
            (true, true) => JoinKind::LateralLeft,
            (true, false) => JoinKind::Lateral,
            (false, true) => JoinKind::Left,
            (false, false) => JoinKind::Inner,
        };
        if matches!(kind, JoinKind::Lateral | JoinKind::LateralLeft) && !self.dialect.supports_lateral()
        {
            return Err(Error::simple(
                ErrorKind::UnsupportedDialectFeature,
                "dialect does not support LATERAL joins",
            )
            .with_node(node.id));
        }

        frame.base = Clause::Join {
            left: Box::new(frame.base),
            right: Box::new(right_clause),
            on,
            kind,
        };
        frame.col_source = combined;
        Ok(frame)
    }

    fn translate_group(
        &mut self,
        mut frame: Frame,
        node: &Node,
        keys: &[ScalarNode],
    ) -> Result<Frame> {
        if keys.is_empty() {
            if let Some(prev_group) = frame.group_node_id {
                let has_aggregate = self
                    .resolution
                    .producers
                    .values()
                    .any(|p| *p == prev_group);
                if !has_aggregate {
                    let projections = self.default_projections(&frame, prev_group)?;
                    frame.projections = Some(projections);
                    frame.distinct = true;
                    frame.group_keys = None;
                    frame.group_node_id = None;
                    return Ok(frame);
                }
            }
            // Plain whole-dataset aggregation: no GROUP BY, aggregates span
            // every row.
            if frame.is_closed() || frame.group_keys.is_some() {
                let over_id = node.over().expect("Group layers over a pipeline").id;
                frame = self.flush(frame, over_id)?;
            }
            frame.group_keys = Some(Vec::new());
            frame.group_node_id = Some(node.id);
            return Ok(frame);
        }

        if frame.is_closed() || frame.group_keys.is_some() {
            let over_id = node.over().expect("Group layers over a pipeline").id;
            frame = self.flush(frame, over_id)?;
        }

        let mut dedup = HashMap::new();
        let mut exprs = Vec::with_capacity(keys.len());
        for key in keys {
            exprs.push(self.lower_labeled(key, &frame.col_source, &mut dedup)?);
        }
        if let Some(rt) = self.resolution.row_types.get(&node.id) {
            for ((_, slot), expr) in rt.slots.iter().zip(exprs.iter()) {
                if let Slot::Column(id) = slot {
                    frame.col_source.insert(*id, expr.clone());
                }
            }
        }
        frame.group_keys = Some(exprs);
        frame.group_node_id = Some(node.id);
        Ok(frame)
    }

    fn translate_partition(
        &mut self,
        mut frame: Frame,
        node: &Node,
        spec: &PartitionSpec,
    ) -> Result<Frame> {
        if frame.is_closed() {
            let over_id = node.over().expect("Partition layers over a pipeline").id;
            frame = self.flush(frame, over_id)?;
        }
        let mut dedup = HashMap::new();
        let partition_by = spec
            .keys
            .iter()
            .map(|k| self.lower_labeled(k, &frame.col_source, &mut dedup))
            .collect::<Result<Vec<_>>>()?;
        let order_by = spec
            .order
            .iter()
            .map(|k| self.lower_sort(k, &frame.col_source))
            .collect::<Result<Vec<_>>>()?;
        let frame_spec = spec
            .frame
            .as_ref()
            .map(|f| self.lower_window_frame(f, &frame.col_source))
            .transpose()?;
        self.window_specs.insert(
            node.id,
            WindowSpec {
                partition_by,
                order_by,
                frame: frame_spec,
            },
        );
        Ok(frame)
    }

    fn translate_order(
        &mut self,
        mut frame: Frame,
        node: &Node,
        keys: &[ScalarNode],
    ) -> Result<Frame> {
        if frame.limit.is_some() {
            let over_id = node.over().expect("Order layers over a pipeline").id;
            frame = self.flush(frame, over_id)?;
        }
        for key in keys {
            let sorted = self.lower_sort(key, &frame.col_source)?;
            frame.order.push(sorted);
        }
        Ok(frame)
    }

    fn translate_append(&mut self, node: &Node, branches: &[Node]) -> Result<Frame> {
        let first_node = node.over().expect("Append layers over its first branch");
        let first_frame = self.translate_node(first_node)?;
        let mut parts = vec![self.finalize_select(first_frame, first_node.id)?];
        for branch in branches {
            let branch_frame = self.translate_node(branch)?;
            parts.push(self.finalize_select(branch_frame, branch.id)?);
        }
        let alias = self.alias_for("union");
        let base = Clause::From(Box::new(Clause::As {
            over: Box::new(Clause::UnionAll(parts)),
            alias: alias.clone(),
            columns: None,
        }));
        let col_source = self.map_columns(node, &alias);
        Ok(Frame {
            base,
            col_source,
            ..Frame::empty()
        })
    }

    fn register_with_ctes(&mut self, ctes: &[crate::ast::CteBinding]) -> Result<()> {
        for cte in ctes {
            let body_frame = self.translate_node(&cte.body)?;
            let body_clause = self.finalize_select(body_frame, cte.body.id)?;
            let columns = self.label_id_pairs(cte.body.id);
            self.pending_ctes.push(CteClause {
                name: cte.name.clone(),
                columns: columns.iter().map(|(l, _)| l.clone()).collect(),
                body: body_clause,
                materialized: cte.materialized,
            });
            self.ctes
                .insert(cte.name.clone(), CteScope { columns });
        }
        Ok(())
    }

    fn register_external_ctes(&mut self, ctes: &[crate::ast::ExternalCteBinding]) {
        for cte in ctes {
            let rt = self
                .resolution
                .external_cte_row_types
                .get(&cte.name)
                .cloned()
                .unwrap_or_default();
            let columns: Vec<(String, ColumnId)> = rt
                .slots
                .iter()
                .filter_map(|(label, slot)| match slot {
                    Slot::Column(id) => Some((label.clone(), *id)),
                    Slot::Nested(_) => None,
                })
                .collect();
            self.pending_ctes.push(CteClause {
                name: cte.name.clone(),
                columns: cte.columns.clone(),
                body: Clause::Raw(cte.sql.clone()),
                materialized: cte.materialized,
            });
            self.ctes
                .insert(cte.name.clone(), CteScope { columns });
        }
    }

    fn translate_iterate(
        &mut self,
        frame: Frame,
        node: &Node,
        spec: &crate::ast::IterateSpec,
    ) -> Result<Frame> {
        if !self.dialect.supports_with_recursive() {
            return Err(Error::simple(
                ErrorKind::UnsupportedDialectFeature,
                "dialect does not support WITH RECURSIVE",
            )
            .with_node(node.id));
        }
        let over = node.over().expect("Iterate layers over its base");
        let base_columns = self.label_id_pairs(over.id);
        let base_clause = self.finalize_select(frame, over.id)?;

        let alias = self.alias_for(&base_table_hint(over));
        self.ctes.insert(
            alias.clone(),
            CteScope {
                columns: base_columns.clone(),
            },
        );

        self.previous.push(alias.clone());
        let step_result = self.translate_node(&spec.step);
        self.previous.pop();
        let step_frame = step_result?;
        let step_clause = self.finalize_select(step_frame, spec.step.id)?;

        let body = Clause::UnionAll(vec![base_clause, step_clause]);
        self.pending_ctes.push(CteClause {
            name: alias.clone(),
            columns: base_columns.iter().map(|(l, _)| l.clone()).collect(),
            body,
            materialized: Materialized::Default,
        });
        self.used_ctes.insert(alias.clone());

        let base = Clause::From(Box::new(Clause::Ref(alias.clone())));
        let col_source = base_columns
            .into_iter()
            .map(|(label, id)| (id, ClauseExpr::Id(vec![alias.clone(), label])))
            .collect();
        Ok(Frame {
            base,
            col_source,
            ..Frame::empty()
        })
    }

    fn translate_bind(&mut self, spec: &BindSpec) -> Result<Frame> {
        let outer = self
            .var_bindings
            .last()
            .cloned()
            .unwrap_or_default();
        // The outer scope a `Bind`'s params correlate against is whatever
        // the *caller* (e.g. `Join::translate_join`) had open; since `Bind`
        // nodes have no `over`, we fall back to the nearest enclosing
        // `Bind`'s own bindings as a best-effort correlation context when
        // binds nest.
        let mut bindings = HashMap::new();
        for (name, value) in &spec.params {
            let mut dedup = HashMap::new();
            let expr = self.lower_labeled(value, &outer, &mut dedup)?;
            bindings.insert(name.clone(), expr);
        }
        self.var_bindings.push(bindings);
        let result = self.translate_node(&spec.sub);
        self.var_bindings.pop();

        let frame = result?;
        let alias = self.alias_for("bind");
        let clause = self.finalize_select(frame, spec.sub.id)?;
        let base = Clause::From(Box::new(Clause::As {
            over: Box::new(clause),
            alias: alias.clone(),
            columns: None,
        }));
        let columns = self.label_id_pairs(spec.sub.id);
        let col_source = columns
            .into_iter()
            .map(|(label, id)| (id, ClauseExpr::Id(vec![alias.clone(), label])))
            .collect();
        Ok(Frame {
            base,
            col_source,
            ..Frame::empty()
        })
    }

    // -- closing a frame ----------------------------------------------

    fn produced_column(&self, node_id: NodeId, label: &str) -> Option<ColumnId> {
        self.resolution
            .row_types
            .get(&node_id)
            .and_then(|rt| rt.get(label))
            .and_then(|slot| slot.as_column().copied())
    }

    fn label_id_pairs(&self, node_id: NodeId) -> Vec<(String, ColumnId)> {
        self.resolution
            .row_types
            .get(&node_id)
            .map(|rt| {
                rt.slots
                    .iter()
                    .filter_map(|(label, slot)| match slot {
                        Slot::Column(id) => Some((label.clone(), *id)),
                        Slot::Nested(inner) => inner
                            .slots
                            .first()
                            .and_then(|(_, s)| s.as_column().copied())
                            .map(|id| (label.clone(), id)),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn default_projections(&self, frame: &Frame, labels_from: NodeId) -> Result<Vec<Projection>> {
        let pairs = self.label_id_pairs(labels_from);
        Ok(pairs
            .into_iter()
            .map(|(label, id)| Projection {
                label: label.clone(),
                expr: frame
                    .col_source
                    .get(&id)
                    .cloned()
                    .unwrap_or(ClauseExpr::Id(vec![label])),
            })
            .collect())
    }

    /// Closes `frame` into a raw `Clause` (`WHERE`/`GROUP BY`/`HAVING`/
    /// `SELECT`/`ORDER BY`/`LIMIT` nested in SQL evaluation order),
    /// without wrapping it as a new `FROM` source.
    fn finalize_select(&mut self, frame: Frame, labels_from: NodeId) -> Result<Clause> {
        let Frame {
            base,
            wheres,
            group_keys,
            havings,
            projections,
            distinct,
            order,
            limit,
            col_source,
            ..
        } = frame;

        let mut c = base;
        if !wheres.is_empty() {
            c = Clause::Where {
                over: Box::new(c),
                cond: and_all(wheres),
            };
        }
        if let Some(keys) = group_keys {
            if !keys.is_empty() {
                c = Clause::Group {
                    over: Box::new(c),
                    keys,
                };
            }
        }
        if !havings.is_empty() {
            c = Clause::Having {
                over: Box::new(c),
                cond: and_all(havings),
            };
        }
        let projections = match projections {
            Some(p) => p,
            None => self.default_projections(
                &Frame {
                    base: Clause::Raw(String::new()),
                    col_source,
                    ..Frame::empty()
                },
                labels_from,
            )?,
        };
        c = Clause::Select {
            over: Box::new(c),
            distinct,
            projections,
        };
        if !order.is_empty() {
            c = Clause::Order {
                over: Box::new(c),
                keys: order,
            };
        }
        if let Some((offset, count)) = limit {
            c = Clause::Limit {
                over: Box::new(c),
                offset,
                count,
            };
        }
        Ok(c)
    }

    /// Closes `frame` and wraps the result as a freshly-aliased derived
    /// table, returning a new open `Frame` layered on top of it.
    fn flush(&mut self, frame: Frame, labels_from: NodeId) -> Result<Frame> {
        let labels = self.label_id_pairs(labels_from);
        let clause = self.finalize_select(frame, labels_from)?;
        let alias = self.alias_for("sub");
        let base = Clause::From(Box::new(Clause::As {
            over: Box::new(clause),
            alias: alias.clone(),
            columns: None,
        }));
        let col_source = labels
            .into_iter()
            .map(|(label, id)| (id, ClauseExpr::Id(vec![alias.clone(), label])))
            .collect();
        Ok(Frame {
            base,
            col_source,
            ..Frame::empty()
        })
    }

    /// Wraps the fully-translated main relation in a `WITH` clause
    /// containing every CTE that ended up referenced (spec §6: "A WITH
    /// clause is emitted only if at least one binding is referenced").
    fn attach_ctes(&mut self, main: Clause) -> Result<Clause> {
        let used: Vec<CteClause> = self
            .pending_ctes
            .drain(..)
            .filter(|c| self.used_ctes.contains(&c.name))
            .collect();
        if used.is_empty() {
            return Ok(main);
        }
        // A recursive CTE's body legitimately refers to its own name; that
        // self-reference isn't an ordering constraint, so it's excluded here
        // rather than taught to `toposort`, which must still reject a real
        // cycle between two distinct CTEs.
        let deps: Vec<(String, Vec<String>)> = used
            .iter()
            .map(|c| {
                let refs = clause_refs(&c.body)
                    .into_iter()
                    .filter(|r| r != &c.name)
                    .collect();
                (c.name.clone(), refs)
            })
            .collect();
        let order = toposort(&deps, None).ok_or_else(|| {
            Error::simple(ErrorKind::CyclicIteration, "cyclic CTE reference graph")
        })?;
        let mut by_name: HashMap<String, CteClause> =
            used.into_iter().map(|c| (c.name.clone(), c)).collect();
        let ordered: Vec<CteClause> = order
            .into_iter()
            .filter_map(|name| by_name.remove(name))
            .collect();
        let recursive = ordered.iter().any(|c| matches!(c.body, Clause::UnionAll(_)));
        Ok(Clause::With {
            over: Box::new(main),
            ctes: ordered,
            recursive,
        })
    }

    // -- scalar lowering -----------------------------------------------

    fn lower_labeled(
        &mut self,
        scalar: &ScalarNode,
        col_source: &HashMap<ColumnId, ClauseExpr>,
        dedup: &mut HashMap<String, ClauseExpr>,
    ) -> Result<ClauseExpr> {
        match &scalar.kind {
            ScalarKind::Lit(l) => Ok(ClauseExpr::Literal(l.clone())),
            ScalarKind::Get(_) => {
                let id = self
                    .resolution
                    .get_refs
                    .get(&scalar.id)
                    .copied()
                    .ok_or_else(|| {
                        Error::simple(ErrorKind::Unresolved, "unresolved column reference")
                            .with_node(scalar.id)
                    })?;
                col_source.get(&id).cloned().ok_or_else(|| {
                    Error::simple(
                        ErrorKind::Unresolved,
                        "column not visible at this point in the pipeline",
                    )
                    .with_node(scalar.id)
                })
            }
            ScalarKind::Var(name) => Ok(self
                .var_bindings
                .iter()
                .rev()
                .find_map(|scope| scope.get(name).cloned())
                .unwrap_or_else(|| ClauseExpr::Placeholder(name.clone()))),
            ScalarKind::Fun { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.lower_labeled(a, col_source, dedup))
                    .collect::<Result<Vec<_>>>()?;
                let name = if name == "||" { "concat".to_string() } else { name.clone() };
                Ok(classify_call(name, args))
            }
            ScalarKind::Agg { name, args, filter } => {
                let producer = self.resolution.producers.get(&scalar.id).copied().ok_or_else(|| {
                    Error::simple(
                        ErrorKind::AggWithoutGroup,
                        "aggregate used without an enclosing Group or Partition",
                    )
                    .with_node(scalar.id)
                })?;

                let signature = format!("{}@{:?}", producer.0, scalar_signature(scalar));
                if let Some(cached) = dedup.get(&signature) {
                    return Ok(cached.clone());
                }

                let mut lowered_args = args
                    .iter()
                    .map(|a| self.lower_labeled(a, col_source, dedup))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(pred) = filter {
                    let pred = self.lower_labeled(pred, col_source, dedup)?;
                    if lowered_args.is_empty() {
                        lowered_args.push(ClauseExpr::Literal(Literal::Integer(1)));
                    }
                    lowered_args[0] = ClauseExpr::Operator {
                        name: "case".to_string(),
                        args: vec![pred, lowered_args[0].clone(), ClauseExpr::Literal(Literal::Null)],
                    };
                }

                let func = ClauseExpr::Function {
                    name: name.clone(),
                    args: lowered_args,
                };
                let result = if let Some(win) = self.window_specs.get(&producer) {
                    ClauseExpr::Window {
                        func: Box::new(func),
                        partition_by: win.partition_by.clone(),
                        order_by: win.order_by.clone(),
                        frame: win.frame.clone(),
                    }
                } else {
                    func
                };
                dedup.insert(signature, result.clone());
                Ok(result)
            }
            ScalarKind::Sort { expr, .. } => self.lower_labeled(expr, col_source, dedup),
        }
    }

    fn lower_sort(
        &mut self,
        key: &ScalarNode,
        col_source: &HashMap<ColumnId, ClauseExpr>,
    ) -> Result<SortedExpr> {
        let mut dedup = HashMap::new();
        match &key.kind {
            ScalarKind::Sort {
                expr,
                direction,
                nulls,
            } => Ok(SortedExpr {
                expr: self.lower_labeled(expr, col_source, &mut dedup)?,
                direction: *direction,
                nulls: *nulls,
            }),
            _ => Ok(SortedExpr {
                expr: self.lower_labeled(key, col_source, &mut dedup)?,
                direction: SortDirection::Asc,
                nulls: NullsOrder::Default,
            }),
        }
    }

    fn lower_window_frame(
        &mut self,
        frame: &WindowFrame<ScalarNode>,
        col_source: &HashMap<ColumnId, ClauseExpr>,
    ) -> Result<WindowFrame<ClauseExpr>> {
        let mut dedup = HashMap::new();
        let start = frame
            .range
            .start
            .as_ref()
            .map(|s| self.lower_labeled(s, col_source, &mut dedup))
            .transpose()?;
        let end = frame
            .range
            .end
            .as_ref()
            .map(|s| self.lower_labeled(s, col_source, &mut dedup))
            .transpose()?;
        Ok(WindowFrame {
            mode: frame.mode,
            range: Range { start, end },
        })
    }
}

fn classify_call(name: String, args: Vec<ClauseExpr>) -> ClauseExpr {
    let is_symbolic = !name.is_empty() && name.chars().all(|c| !c.is_alphanumeric() && c != '_');
    if is_symbolic {
        ClauseExpr::Operator { name, args }
    } else {
        ClauseExpr::Function { name, args }
    }
}

fn and_all(mut exprs: Vec<ClauseExpr>) -> ClauseExpr {
    if exprs.len() == 1 {
        return exprs.remove(0);
    }
    ClauseExpr::Operator {
        name: "and".to_string(),
        args: exprs,
    }
}

/// Structural signature of a scalar, ignoring `NodeId`s, used to dedup
/// aggregates that share structure within the same group (spec §4.3, §4.5,
/// §8 "two structurally equal aggregates under the same Group appear once").
fn scalar_signature(scalar: &ScalarNode) -> String {
    fn go(kind: &ScalarKind, out: &mut String) {
        match kind {
            ScalarKind::Lit(l) => out.push_str(&format!("Lit({l})")),
            ScalarKind::Get(path) => out.push_str(&format!("Get({})", path.join("."))),
            ScalarKind::Var(name) => out.push_str(&format!("Var({name})")),
            ScalarKind::Fun { name, args } => {
                out.push_str(&format!("Fun({name},["));
                for a in args {
                    go(&a.kind, out);
                    out.push(',');
                }
                out.push_str("])");
            }
            ScalarKind::Agg { name, args, filter } => {
                out.push_str(&format!("Agg({name},["));
                for a in args {
                    go(&a.kind, out);
                    out.push(',');
                }
                out.push(']');
                if let Some(f) = filter {
                    out.push(',');
                    go(&f.kind, out);
                }
                out.push(')');
            }
            ScalarKind::Sort {
                expr,
                direction,
                nulls,
            } => {
                out.push_str("Sort(");
                go(&expr.kind, out);
                out.push_str(&format!(",{direction:?},{nulls:?})"));
            }
        }
    }
    let mut out = String::new();
    go(&scalar.kind, &mut out);
    out
}

/// Flattens a (possibly `As`-nested) row-type into `alias.label` refs,
/// using each leaf's own label (labels are unique within scope, invariant
/// 6) rather than a dotted path.
fn flatten_row_type(
    rt: &crate::ast::RowType,
    alias: &str,
    out: &mut HashMap<ColumnId, ClauseExpr>,
) {
    for (label, slot) in &rt.slots {
        match slot {
            Slot::Column(id) => {
                out.insert(*id, ClauseExpr::Id(vec![alias.to_string(), label.clone()]));
            }
            Slot::Nested(inner) => flatten_row_type(inner, alias, out),
        }
    }
}

/// Best-effort alias hint for an `Iterate` CTE (spec §4.5: "for Iterate the
/// alias follows the base table name").
fn base_table_hint(node: &Node) -> String {
    match &node.kind {
        NodeKind::From(FromSource::Table(t)) => t.name.clone(),
        NodeKind::From(FromSource::Ref(name)) => name.clone(),
        _ => node
            .over()
            .map(base_table_hint)
            .unwrap_or_else(|| "recurse".to_string()),
    }
}

/// CTE names referenced by `Ref` anywhere inside `clause`, used to
/// topologically order the final `WITH` list.
fn clause_refs(clause: &Clause) -> Vec<String> {
    let mut out = Vec::new();
    collect_clause_refs(clause, &mut out);
    out
}

fn collect_clause_refs(clause: &Clause, out: &mut Vec<String>) {
    match clause {
        Clause::Ref(name) => out.push(name.clone()),
        Clause::Id { .. } | Clause::Values { .. } | Clause::Raw(_) => {}
        Clause::As { over, .. } | Clause::From(over) | Clause::Note { over, .. } => {
            collect_clause_refs(over, out)
        }
        Clause::Where { over, cond } | Clause::Having { over, cond } => {
            collect_clause_refs(over, out);
            collect_expr_refs(cond, out);
        }
        Clause::Select {
            over, projections, ..
        } => {
            collect_clause_refs(over, out);
            for p in projections {
                collect_expr_refs(&p.expr, out);
            }
        }
        Clause::Join {
            left, right, on, ..
        } => {
            collect_clause_refs(left, out);
            collect_clause_refs(right, out);
            collect_expr_refs(on, out);
        }
        Clause::Group { over, keys } => {
            collect_clause_refs(over, out);
            for k in keys {
                collect_expr_refs(k, out);
            }
        }
        Clause::Order { over, keys } => {
            collect_clause_refs(over, out);
            for k in keys {
                collect_expr_refs(&k.expr, out);
            }
        }
        Clause::Limit { over, .. } => collect_clause_refs(over, out),
        Clause::UnionAll(parts) => {
            for p in parts {
                collect_clause_refs(p, out);
            }
        }
        Clause::With { over, ctes, .. } => {
            collect_clause_refs(over, out);
            for c in ctes {
                collect_clause_refs(&c.body, out);
            }
        }
    }
}

fn collect_expr_refs(expr: &ClauseExpr, out: &mut Vec<String>) {
    match expr {
        ClauseExpr::Id(_) | ClauseExpr::Literal(_) | ClauseExpr::Placeholder(_) => {}
        ClauseExpr::Operator { args, .. } | ClauseExpr::Function { args, .. } => {
            for a in args {
                collect_expr_refs(a, out);
            }
        }
        ClauseExpr::Window {
            func,
            partition_by,
            order_by,
            ..
        } => {
            collect_expr_refs(func, out);
            for k in partition_by {
                collect_expr_refs(k, out);
            }
            for k in order_by {
                collect_expr_refs(&k.expr, out);
            }
        }
        ClauseExpr::Subquery(clause) => collect_clause_refs(clause, out),
    }
}
