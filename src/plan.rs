//! The clause tree (spec §3 "Clause node"): the lower-level, SQL-shaped
//! tree produced by translation and consumed by assembly/serialization.
//!
//! The spec describes one tagged "Clause node" type spanning both
//! relation-level clauses (FROM, SELECT, JOIN, …) and scalar-level ones
//! (LITERAL, OPERATOR, …). We split that into two Rust types — [`Clause`]
//! for relations and [`ClauseExpr`] for scalars — for the same reason the
//! teacher's `sql::pq`/`srq` split a `SqlTransform` tree from its `Expr`
//! payloads: a relation can't accidentally be used where a scalar is
//! expected, and vice versa. `ID` appears in both ([`Clause::Id`] for table
//! and CTE names, [`ClauseExpr::Id`] for column references).

use serde::{Deserialize, Serialize};

use crate::ast::generic::{NullsOrder, SortDirection, WindowFrame};
use crate::ast::Literal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// A table or CTE identifier, optionally schema-qualified.
    Id {
        schema: Option<String>,
        name: String,
    },
    /// Wraps `over` with an alias and, optionally, positional column
    /// aliases (used for `VALUES` sources).
    As {
        over: Box<Clause>,
        alias: String,
        columns: Option<Vec<String>>,
    },
    From(Box<Clause>),
    Where {
        over: Box<Clause>,
        cond: ClauseExpr,
    },
    Having {
        over: Box<Clause>,
        cond: ClauseExpr,
    },
    Select {
        over: Box<Clause>,
        distinct: bool,
        projections: Vec<Projection>,
    },
    Join {
        left: Box<Clause>,
        right: Box<Clause>,
        on: ClauseExpr,
        kind: JoinKind,
    },
    Group {
        over: Box<Clause>,
        keys: Vec<ClauseExpr>,
    },
    Order {
        over: Box<Clause>,
        keys: Vec<SortedExpr>,
    },
    Limit {
        over: Box<Clause>,
        offset: u64,
        count: u64,
    },
    UnionAll(Vec<Clause>),
    With {
        over: Box<Clause>,
        ctes: Vec<CteClause>,
        recursive: bool,
    },
    Values {
        columns: Vec<String>,
        rows: Vec<Vec<Literal>>,
    },
    /// A bare reference to a name bound by an enclosing `With` (including a
    /// recursive self-reference inside an `Iterate` step).
    Ref(String),
    /// Comment passthrough, e.g. marking a CTE hoisted for deduplication.
    Note {
        text: String,
        over: Box<Clause>,
    },
    /// Verbatim dialect-native SQL, used for `WithExternal` CTE bodies.
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
    Lateral,
    LateralLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub label: String,
    pub expr: ClauseExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CteClause {
    pub name: String,
    pub columns: Vec<String>,
    pub body: Clause,
    pub materialized: crate::ast::Materialized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortedExpr {
    pub expr: ClauseExpr,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum ClauseExpr {
    /// A column reference, fully qualified (`["person_1", "person_id"]`)
    /// by the time assembly hands it to the serializer.
    Id(Vec<String>),
    Literal(Literal),
    Operator {
        name: String,
        args: Vec<ClauseExpr>,
    },
    Function {
        name: String,
        args: Vec<ClauseExpr>,
    },
    /// A free (unbound) named parameter; resolved to a positional index by
    /// the serializer in left-to-right order of first occurrence.
    Placeholder(String),
    /// An aggregate rendered with an `OVER (...)` clause.
    Window {
        func: Box<ClauseExpr>,
        partition_by: Vec<ClauseExpr>,
        order_by: Vec<SortedExpr>,
        frame: Option<WindowFrame<ClauseExpr>>,
    },
    /// A correlated subquery materialized inline by a `Bind` (e.g. for
    /// `exists`/`in` over a sub-pipeline); `cond`-position only.
    Subquery(Box<Clause>),
}

impl Clause {
    pub fn id(schema: Option<impl Into<String>>, name: impl Into<String>) -> Clause {
        Clause::Id {
            schema: schema.map(Into::into),
            name: name.into(),
        }
    }
}
