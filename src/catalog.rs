//! Catalog (spec §4.2): a mapping from `(optional schema, table-name)` to an
//! ordered list of column names, plus the active dialect.
//!
//! Grounded on the teacher's table declarations (`ir::rq::TableExternRef` /
//! the root module's table entries), simplified to a flat, read-only map
//! since catalog reflection against a live database is explicitly out of
//! scope (spec §1).

use std::collections::HashMap;

use crate::sql::Dialect;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub schema: Option<String>,
    pub name: String,
}

impl TableKey {
    pub fn new(schema: Option<impl Into<String>>, name: impl Into<String>) -> Self {
        TableKey {
            schema: schema.map(Into::into),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    tables: HashMap<TableKey, TableEntry>,
    dialect: Dialect,
}

impl Catalog {
    pub fn new(dialect: Dialect) -> Self {
        Catalog {
            tables: HashMap::new(),
            dialect,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn with_table(
        mut self,
        schema: Option<impl Into<String>>,
        name: impl Into<String>,
        columns: Vec<impl Into<String>>,
    ) -> Self {
        self.add_table(schema, name, columns);
        self
    }

    pub fn add_table(
        &mut self,
        schema: Option<impl Into<String>>,
        name: impl Into<String>,
        columns: Vec<impl Into<String>>,
    ) {
        let key = TableKey::new(schema, name);
        let entry = TableEntry {
            columns: columns.into_iter().map(Into::into).collect(),
        };
        self.tables.insert(key, entry);
    }

    /// Looks up a table by bare name, searching schema-less entries first,
    /// then any schema-qualified entry with a matching name (matching spec
    /// §4.2's "unknown names are a resolution error unless... inline
    /// table"). Returns `None` if no such table is cataloged.
    pub fn lookup(&self, name: &str) -> Option<(&TableKey, &TableEntry)> {
        let bare = TableKey::new(None::<String>, name);
        if let Some(entry) = self.tables.get_key_value(&bare) {
            return Some(entry);
        }
        self.tables.iter().find(|(k, _)| k.name == name)
    }

    pub fn lookup_qualified(&self, schema: Option<&str>, name: &str) -> Option<&TableEntry> {
        self.tables.get(&TableKey::new(schema, name))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new(Dialect::default())
    }
}
