use serde::{Deserialize, Serialize};

/// Identity of a single physical/computed column, assigned during
/// resolution. Two `Get`s that resolve to the same `ColumnId` refer to the
/// exact same value — this is what aggregate/expression deduplication (spec
/// §4.3, §4.5) compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub usize);

impl From<usize> for ColumnId {
    fn from(value: usize) -> Self {
        ColumnId(value)
    }
}

impl std::fmt::Display for ColumnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Row-type: an ordered mapping from label to a slot (spec §3,
/// "Row-type"). Immutable once attached to a node by the resolution pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RowType {
    pub slots: Vec<(String, Slot)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, enum_as_inner::EnumAsInner)]
pub enum Slot {
    Column(ColumnId),
    Nested(RowType),
}

impl RowType {
    pub fn new() -> Self {
        RowType::default()
    }

    pub fn push(&mut self, label: impl Into<String>, slot: Slot) {
        let label = label.into();
        if let Some(existing) = self.slots.iter_mut().find(|(l, _)| *l == label) {
            existing.1 = slot;
        } else {
            self.slots.push((label, slot));
        }
    }

    pub fn get(&self, label: &str) -> Option<&Slot> {
        self.slots.iter().find(|(l, _)| l == label).map(|(_, s)| s)
    }

    /// Resolves a dotted path (`a.b.c`) by walking through nested records.
    pub fn get_path(&self, path: &[String]) -> Option<&Slot> {
        let (head, rest) = path.split_first()?;
        let slot = self.get(head)?;
        if rest.is_empty() {
            Some(slot)
        } else {
            match slot {
                Slot::Nested(inner) => inner.get_path(rest),
                Slot::Column(_) => None,
            }
        }
    }

    /// All column ids reachable from this row-type, including nested ones.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        let mut out = Vec::new();
        self.collect_column_ids(&mut out);
        out
    }

    fn collect_column_ids(&self, out: &mut Vec<ColumnId>) {
        for (_, slot) in &self.slots {
            match slot {
                Slot::Column(cid) => out.push(*cid),
                Slot::Nested(inner) => inner.collect_column_ids(out),
            }
        }
    }

    /// Labels exposed at the top level, in order (used by `Append`'s
    /// positional-intersection rule, spec invariant 3).
    pub fn labels(&self) -> Vec<&str> {
        self.slots.iter().map(|(l, _)| l.as_str()).collect()
    }
}
