//! Small generic shapes shared between the semantic tree and the clause
//! tree, mirrored on the teacher's `ir::generic` module.

use serde::{Deserialize, Serialize};

/// Inclusive-inclusive range; a missing bound means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Range<T> {
    pub start: Option<T>,
    pub end: Option<T>,
}

impl<T> Range<T> {
    pub const fn unbounded() -> Self {
        Range {
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSort<T> {
    pub column: T,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    #[default]
    Default,
    First,
    Last,
}

/// Window frame attached to a `Partition` node (spec §3, `Partition` row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame<T> {
    pub mode: FrameMode,
    pub range: Range<T>,
}

impl<T> Default for WindowFrame<T> {
    fn default() -> Self {
        WindowFrame {
            mode: FrameMode::Rows,
            range: Range::unbounded(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameMode {
    Rows,
    Range,
    Groups,
}
