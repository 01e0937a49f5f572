//! Primary-key point lookups used to resolve index hits.

use anyhow::Result;
use async_trait::async_trait;
use datafusion::common::ScalarValue;

use crate::indexing::{ColumnDef, IndexDefinition};

/// Parameterized single-row lookup against an index's primary table.
///
/// Built once per cursor and bound with a new primary key for every hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointQuery {
    pub table_name: String,
    /// Columns returned, in result order.
    pub columns: Vec<ColumnDef>,
    /// Primary key column the single parameter binds to.
    pub key_column: String,
    /// Rendered query text, `SELECT .. FROM .. WHERE pk=?`.
    pub text: String,
}

impl PointQuery {
    /// Builds the lookup for `requested` columns, or for every column when
    /// `requested` is `None` or empty.
    pub fn build(index: &IndexDefinition, requested: Option<&[String]>) -> Result<Self> {
        let key_column = index.column(&index.primary_key_column)?.name.clone();
        let (columns, projection) = match requested {
            Some(names) if !names.is_empty() => {
                let columns = names
                    .iter()
                    .map(|name| index.column(name).cloned())
                    .collect::<Result<Vec<_>>>()?;
                let projection = columns
                    .iter()
                    .map(ColumnDef::full_name)
                    .collect::<Vec<_>>()
                    .join(",");
                (columns, projection)
            }
            _ => (index.columns.clone(), "*".to_string()),
        };
        let text = format!(
            "SELECT {} FROM {} WHERE {}=?",
            projection, index.table_name, key_column
        );
        Ok(Self {
            table_name: index.table_name.clone(),
            columns,
            key_column,
            text,
        })
    }
}

/// Executes a [`PointQuery`] with one bound primary-key value.
#[async_trait]
pub trait PointQueryExecutor: Send + Sync + 'static {
    /// Returns the row's values in `query.columns` order, or `None` when no
    /// row has that key.
    async fn query_one(
        &self,
        query: &PointQuery,
        key: ScalarValue,
    ) -> Result<Option<Vec<ScalarValue>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::ColumnType;

    fn definition() -> IndexDefinition {
        IndexDefinition {
            table_id: 1,
            index_id: 1,
            table_name: "users".to_string(),
            index_name: "idx_users_email".to_string(),
            key_columns: vec!["email".to_string()],
            columns: vec![
                ColumnDef::new("id", ColumnType::Int64).not_null(),
                ColumnDef::new("email", ColumnType::Utf8),
                ColumnDef::new("age", ColumnType::Int64),
            ],
            primary_key_column: "id".to_string(),
        }
    }

    #[test]
    fn requested_columns_are_projected_in_order() {
        let requested = vec!["AGE".to_string(), "email".to_string()];
        let query = PointQuery::build(&definition(), Some(requested.as_slice())).expect("build");
        assert_eq!(query.text, "SELECT cf.age,cf.email FROM users WHERE id=?");
        let names = query.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["age", "email"]);
    }

    #[test]
    fn no_requested_columns_selects_everything() {
        let query = PointQuery::build(&definition(), None).expect("build");
        assert_eq!(query.text, "SELECT * FROM users WHERE id=?");
        assert_eq!(query.columns.len(), 3);

        let empty: Vec<String> = Vec::new();
        let query = PointQuery::build(&definition(), Some(empty.as_slice())).expect("build");
        assert_eq!(query.columns.len(), 3);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let requested = vec!["missing".to_string()];
        assert!(PointQuery::build(&definition(), Some(requested.as_slice())).is_err());
    }
}
