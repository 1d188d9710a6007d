use serde::{Deserialize, Serialize};

use super::generic::{NullsOrder, SortDirection};
use super::literal::Literal;
use super::NodeId;

/// Scalar node (spec §3, "Scalar node"): `Lit`, `Get`, `Var`, `Fun`, `Agg`,
/// `Sort`. A window-aggregate is simply an `Agg` whose nearest enclosing
/// producer (found during resolution) is a `Partition` rather than a
/// `Group` — there is no separate tag for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarNode {
    pub id: NodeId,
    pub kind: ScalarKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum ScalarKind {
    Lit(Literal),

    /// A path into the current scope's row-type, e.g. `Get.a.b.c`. A single
    /// element is a bare reference (`Get.name`), resolved against the
    /// flattest available scope.
    Get(Vec<String>),

    /// An unbound named parameter. Resolved either by the nearest enclosing
    /// `Bind` (inlined with the bound scalar) or, if no `Bind` binds it, left
    /// as a free query parameter that becomes a positional placeholder at
    /// serialization time.
    Var(String),

    Fun {
        name: String,
        args: Vec<ScalarNode>,
    },

    Agg {
        name: String,
        args: Vec<ScalarNode>,
        filter: Option<Box<ScalarNode>>,
    },

    /// Wraps an expression with ordering direction/null placement; only
    /// meaningful inside `Order`, `Partition`'s `order`, or `Limit`-adjacent
    /// sort lists.
    Sort {
        expr: Box<ScalarNode>,
        direction: SortDirection,
        nulls: NullsOrder,
    },
}

impl ScalarNode {
    pub fn new(id: NodeId, kind: ScalarKind) -> Self {
        ScalarNode { id, kind }
    }
}
