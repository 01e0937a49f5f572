use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Column family used when a column does not name one.
pub const DEFAULT_COLUMN_FAMILY: &str = "cf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    Float64,
    Boolean,
    Utf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default = "default_family")]
    pub family: String,
}

fn default_family() -> String {
    DEFAULT_COLUMN_FAMILY.to_string()
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            family: default_family(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Qualified name used in point-query text.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.family, self.name)
    }
}

/// A secondary index over one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table_id: u64,
    pub index_id: u64,
    pub table_name: String,
    pub index_name: String,
    /// Indexed columns, in key order.
    pub key_columns: Vec<String>,
    /// Every column of the indexed table.
    pub columns: Vec<ColumnDef>,
    /// Signed-integer primary key column of the indexed table.
    pub primary_key_column: String,
}

impl IndexDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.table_id == 0 {
            return Err(anyhow!("index definition has invalid table_id=0"));
        }
        if self.index_id == 0 {
            return Err(anyhow!("index definition has invalid index_id=0"));
        }
        if self.table_name.trim().is_empty() {
            return Err(anyhow!("index definition has empty table_name"));
        }
        if self.index_name.trim().is_empty() {
            return Err(anyhow!("index definition has empty index_name"));
        }
        if self.key_columns.is_empty() {
            return Err(anyhow!("index '{}' has no key columns", self.index_name));
        }
        let mut seen = BTreeSet::<String>::new();
        for key in &self.key_columns {
            let normalized = key.to_ascii_lowercase();
            if !seen.insert(normalized.clone()) {
                return Err(anyhow!(
                    "index '{}' has duplicate key column '{}'",
                    self.index_name,
                    normalized
                ));
            }
            self.column(key)?;
        }
        let primary_key = self.column(&self.primary_key_column)?;
        if primary_key.column_type != ColumnType::Int64 {
            return Err(anyhow!(
                "primary key column '{}' of table '{}' must be Int64",
                primary_key.name,
                self.table_name
            ));
        }
        Ok(())
    }

    /// Looks up a table column by case-insensitive name.
    pub fn column(&self, name: &str) -> Result<&ColumnDef> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                anyhow!(
                    "column '{}' not found in table '{}'",
                    name,
                    self.table_name
                )
            })
    }

    pub fn key_column_defs(&self) -> Result<Vec<&ColumnDef>> {
        self.key_columns
            .iter()
            .map(|name| self.column(name))
            .collect()
    }
}
