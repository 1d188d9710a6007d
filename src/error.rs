//! Error reporter (spec §4.7 / §7): a single error type used by all four
//! passes, carrying the offending node's identity so a surrounding
//! pretty-printer can highlight the subtree, plus a human-readable cause.
//!
//! Grounded on the teacher's `prqlc_ast::error::Error` / `Reason` /
//! `WithErrorInfo` shape: a flat struct with a `kind`, optional node
//! reference, a `Reason` enum, and a hints list, rather than a `thiserror`
//! derive tree.

use std::fmt;

use crate::ast::NodeId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    /// The node at which the error was raised, if any; callers can use this
    /// to highlight the offending subtree.
    pub node: Option<NodeId>,
    pub reason: Reason,
    pub hints: Vec<String>,
}

/// Kinds enumerated in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "PascalCase")]
pub enum ErrorKind {
    Unresolved,
    AmbiguousColumn,
    AggWithoutGroup,
    UnknownTable,
    CyclicIteration,
    UnsupportedDialectFeature,
    InvalidFrame,
    InvalidBind,
    UnknownDialect,
    MissingParameter,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    NotFound { name: String, namespace: String },
    Ambiguous { name: String, candidates: Vec<String> },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Simple(text) => f.write_str(text),
            Reason::NotFound { name, namespace } => {
                write!(f, "{namespace} `{name}` not found")
            }
            Reason::Ambiguous { name, candidates } => {
                write!(
                    f,
                    "`{name}` is ambiguous between {}",
                    candidates.join(", ")
                )
            }
        }
    }
}

impl Error {
    pub fn new(kind: ErrorKind, reason: Reason) -> Self {
        Error {
            kind,
            node: None,
            reason,
            hints: Vec::new(),
        }
    }

    pub fn simple(kind: ErrorKind, message: impl ToString) -> Self {
        Error::new(kind, Reason::Simple(message.to_string()))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)?;
        for hint in &self.hints {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Extension trait for attaching node identity and hints to a `Result`,
/// mirroring the teacher's `WithErrorInfo`.
pub trait WithErrorInfo: Sized {
    fn with_node(self, node: NodeId) -> Self;
    fn push_hint(self, hint: impl Into<String>) -> Self;
}

impl WithErrorInfo for Error {
    fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    fn push_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl<T> WithErrorInfo for Result<T> {
    fn with_node(self, node: NodeId) -> Self {
        self.map_err(|e| e.with_node(node))
    }

    fn push_hint(self, hint: impl Into<String>) -> Self {
        self.map_err(|e| e.push_hint(hint))
    }
}
