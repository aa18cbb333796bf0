//! Schema values passed between stages.
//!
//! The pipeline does not infer or merge column types. Upstream supplies a
//! [`Schema`]; normalize only records which tables and column names showed up
//! so destinations can create matching structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One column of a table, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Type hint supplied upstream. `None` means the destination decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            nullable: true,
        }
    }

    pub fn with_data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Append columns not yet present. Returns true if anything was added.
    pub fn observe_columns<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) -> bool {
        let mut changed = false;
        for name in names {
            if self.column(name).is_none() {
                self.columns.push(ColumnSchema::new(name));
                changed = true;
            }
        }
        changed
    }
}

/// Schema for one source, identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    /// Bumped on every structural change.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            tables: BTreeMap::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
        self.version += 1;
    }

    /// Record that `table` was seen with `columns`. Returns true when the
    /// schema changed and its version was bumped.
    pub fn observe_table<'a>(
        &mut self,
        table: &str,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        let mut changed = false;
        let entry = self.tables.entry(table.to_string()).or_insert_with(|| {
            changed = true;
            TableSchema::new(table)
        });
        if entry.observe_columns(columns) {
            changed = true;
        }
        if changed {
            self.version += 1;
        }
        changed
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
