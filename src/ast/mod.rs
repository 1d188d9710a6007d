//! The node model (spec §2 "Node model", §3 "Data model"): a tagged-variant
//! tree for semantic nodes, immutable after construction.
//!
//! Grounded on the shape of the teacher's `ir::pl` tree (envelope + tagged
//! `ExprKind`/transform enum) but specialized to the operators this spec
//! names — there is no user-facing parser producing this tree (that frontend
//! is explicitly out of scope), so construction happens entirely through the
//! builder methods below.

pub mod generic;
pub mod literal;
pub mod rowtype;
pub mod scalar;

pub use literal::Literal;
pub use rowtype::{ColumnId, RowType, Slot};
pub use scalar::{ScalarKind, ScalarNode};

use serde::{Deserialize, Serialize};

use self::generic::{ColumnSort, Range, WindowFrame};

/// Identity of a semantic node, stable across the resolution side-table and
/// used for error reporting (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        NodeId(value)
    }
}

/// Monotonic, process-wide node id source used by the builder API (§9:
/// function-call surfaces are a legitimate frontend; this is the minimal one
/// the core itself exposes). Compilation passes never allocate new `NodeId`s
/// themselves — only the tree builder does, before a tree reaches `render`.
static NEXT_NODE_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

pub fn next_node_id() -> NodeId {
    NodeId(NEXT_NODE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
}

/// A semantic node: a shared envelope (id, optional `over` parent forming a
/// pipeline) plus a kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// The pipeline this node is layered over, if any. Root nodes (`From`)
    /// have `over: None`.
    pub over: Option<Box<Node>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum NodeKind {
    From(FromSource),
    Select(Vec<Labeled>),
    Define(Vec<Labeled>),
    Where(ScalarNode),
    Join(JoinSpec),
    Group(Vec<ScalarNode>),
    Partition(PartitionSpec),
    Order(Vec<ScalarNode>),
    Limit(LimitSpec),
    Append(Vec<Node>),
    As(String),
    With(Vec<CteBinding>),
    WithExternal(Vec<ExternalCteBinding>),
    Iterate(IterateSpec),
    Bind(BindSpec),
}

/// A labeled scalar, used by `Select`/`Define` (spec §3: "ordered list of
/// scalar nodes each with a derived or explicit label").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Labeled {
    pub label: String,
    pub expr: ScalarNode,
}

#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum FromSource {
    Table(TableRef),
    /// Yields a single-row, single-(zero-)column unit set.
    Nothing,
    InlineRows(InlineTable),
    /// A reference to a CTE (bound by an enclosing `With`) or a catalog
    /// table, resolved by name.
    Ref(String),
    /// `^`: "previous iteration", only valid inside `Iterate`'s `step`.
    Previous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub right: Box<Node>,
    pub on: ScalarNode,
    pub left_outer: bool,
    /// May prune the JOIN if the right side is unused downstream.
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub keys: Vec<ScalarNode>,
    pub order: Vec<ScalarNode>,
    pub frame: Option<WindowFrame<ScalarNode>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitSpec {
    /// 1-based, inclusive range as written by the caller (e.g. rows 5..10).
    pub range: Range<i64>,
}

impl LimitSpec {
    /// Converts the 1-based inclusive range into a 0-based `(offset, count)`
    /// pair for translation. `count` is `u64::MAX` when the range is
    /// open-ended.
    pub fn offset_count(&self) -> (u64, u64) {
        let start = self.range.start.unwrap_or(1).max(1);
        let offset = (start - 1) as u64;
        let count = match self.range.end {
            Some(end) => (end - start + 1).max(0) as u64,
            None => u64::MAX,
        };
        (offset, count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Materialized {
    Default,
    Materialized,
    NotMaterialized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CteBinding {
    pub name: String,
    pub body: Node,
    pub materialized: Materialized,
}

/// A CTE whose body is supplied verbatim (a `NOTE`-style passthrough,
/// spec §3 "WithExternal") rather than compiled from a semantic tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCteBinding {
    pub name: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub materialized: Materialized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterateSpec {
    pub step: Box<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindSpec {
    pub sub: Box<Node>,
    pub params: Vec<(String, ScalarNode)>,
}

/// A sort key as it appears directly in an `Order` list — re-exported for
/// call sites that want `ColumnSort` rather than the `Sort` scalar wrapper.
pub type SortKey = ColumnSort<ScalarNode>;

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, over: Option<Node>) -> Self {
        Node {
            id,
            kind,
            over: over.map(Box::new),
        }
    }

    pub fn over(&self) -> Option<&Node> {
        self.over.as_deref()
    }

    fn layer(self, kind: NodeKind) -> Node {
        Node::new(next_node_id(), kind, Some(self))
    }

    // -- builder surface -------------------------------------------------
    // A minimal function-call frontend (spec §9 permits this one; the DSL
    // macro frontend and operator-overload sugar stay out of the core).

    pub fn table(name: impl Into<String>) -> Node {
        Node::from_source(FromSource::Table(TableRef {
            schema: None,
            name: name.into(),
        }))
    }

    pub fn table_in(schema: impl Into<String>, name: impl Into<String>) -> Node {
        Node::from_source(FromSource::Table(TableRef {
            schema: Some(schema.into()),
            name: name.into(),
        }))
    }

    pub fn nothing() -> Node {
        Node::from_source(FromSource::Nothing)
    }

    pub fn inline_rows(columns: Vec<String>, rows: Vec<Vec<Literal>>) -> Node {
        Node::from_source(FromSource::InlineRows(InlineTable { columns, rows }))
    }

    pub fn reference(name: impl Into<String>) -> Node {
        Node::from_source(FromSource::Ref(name.into()))
    }

    fn from_source(source: FromSource) -> Node {
        Node::new(next_node_id(), NodeKind::From(source), None)
    }

    pub fn select(self, items: Vec<Labeled>) -> Node {
        self.layer(NodeKind::Select(items))
    }

    pub fn define(self, items: Vec<Labeled>) -> Node {
        self.layer(NodeKind::Define(items))
    }

    pub fn filter(self, predicate: ScalarNode) -> Node {
        self.layer(NodeKind::Where(predicate))
    }

    pub fn join(self, right: Node, on: ScalarNode, left_outer: bool, optional: bool) -> Node {
        self.layer(NodeKind::Join(JoinSpec {
            right: Box::new(right),
            on,
            left_outer,
            optional,
        }))
    }

    pub fn group(self, keys: Vec<ScalarNode>) -> Node {
        self.layer(NodeKind::Group(keys))
    }

    pub fn partition(self, spec: PartitionSpec) -> Node {
        self.layer(NodeKind::Partition(spec))
    }

    pub fn order(self, keys: Vec<ScalarNode>) -> Node {
        self.layer(NodeKind::Order(keys))
    }

    pub fn limit(self, range: Range<i64>) -> Node {
        self.layer(NodeKind::Limit(LimitSpec { range }))
    }

    pub fn append(self, branches: Vec<Node>) -> Node {
        self.layer(NodeKind::Append(branches))
    }

    pub fn as_(self, name: impl Into<String>) -> Node {
        self.layer(NodeKind::As(name.into()))
    }

    pub fn with(self, ctes: Vec<CteBinding>) -> Node {
        self.layer(NodeKind::With(ctes))
    }

    pub fn with_external(self, ctes: Vec<ExternalCteBinding>) -> Node {
        self.layer(NodeKind::WithExternal(ctes))
    }

    pub fn iterate(self, step: Node) -> Node {
        self.layer(NodeKind::Iterate(IterateSpec {
            step: Box::new(step),
        }))
    }

    /// Materializes `sub` as a correlated subquery, binding `params` from
    /// the enclosing scope (spec §3, `Bind`). Unlike the other constructors
    /// this does not layer over `self` — a `Bind` is a standalone relation.
    pub fn bind(sub: Node, params: Vec<(String, ScalarNode)>) -> Node {
        Node::new(
            next_node_id(),
            NodeKind::Bind(BindSpec {
                sub: Box::new(sub),
                params,
            }),
            None,
        )
    }
}

impl Labeled {
    pub fn new(label: impl Into<String>, expr: ScalarNode) -> Self {
        Labeled {
            label: label.into(),
            expr,
        }
    }
}

impl ScalarNode {
    pub fn lit(value: Literal) -> ScalarNode {
        ScalarNode::new(next_node_id(), ScalarKind::Lit(value))
    }

    pub fn get(path: &[&str]) -> ScalarNode {
        ScalarNode::new(
            next_node_id(),
            ScalarKind::Get(path.iter().map(|s| s.to_string()).collect()),
        )
    }

    pub fn var(name: impl Into<String>) -> ScalarNode {
        ScalarNode::new(next_node_id(), ScalarKind::Var(name.into()))
    }

    pub fn fun(name: impl Into<String>, args: Vec<ScalarNode>) -> ScalarNode {
        ScalarNode::new(
            next_node_id(),
            ScalarKind::Fun {
                name: name.into(),
                args,
            },
        )
    }

    pub fn agg(name: impl Into<String>, args: Vec<ScalarNode>) -> ScalarNode {
        ScalarNode::new(
            next_node_id(),
            ScalarKind::Agg {
                name: name.into(),
                args,
                filter: None,
            },
        )
    }

    pub fn agg_filtered(
        name: impl Into<String>,
        args: Vec<ScalarNode>,
        filter: ScalarNode,
    ) -> ScalarNode {
        ScalarNode::new(
            next_node_id(),
            ScalarKind::Agg {
                name: name.into(),
                args,
                filter: Some(Box::new(filter)),
            },
        )
    }

    pub fn asc(self) -> ScalarNode {
        self.sorted(generic::SortDirection::Asc, generic::NullsOrder::Default)
    }

    pub fn desc(self) -> ScalarNode {
        self.sorted(generic::SortDirection::Desc, generic::NullsOrder::Default)
    }

    fn sorted(self, direction: generic::SortDirection, nulls: generic::NullsOrder) -> ScalarNode {
        ScalarNode::new(
            next_node_id(),
            ScalarKind::Sort {
                expr: Box::new(self),
                direction,
                nulls,
            },
        )
    }
}
