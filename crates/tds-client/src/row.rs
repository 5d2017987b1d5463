//! Row representation.
//!
//! A row owns its decoded values and shares the column metadata of its
//! result set. Large-object values keep the zero-copy chunks the decoder
//! split off the packet buffer.

use tds_protocol::{ColumnMetadata, ColumnValue};
use tds_types::FromSql;

use crate::error::{Error, Result};

/// A row from a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: ColumnMetadata,
    values: Vec<ColumnValue>,
}

impl Row {
    pub(crate) fn new(columns: ColumnMetadata, values: Vec<ColumnValue>) -> Self {
        Self { columns, values }
    }

    /// Column metadata shared by every row of the result set.
    #[must_use]
    pub fn columns(&self) -> &ColumnMetadata {
        &self.columns
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at a zero-based index.
    pub fn value(&self, index: usize) -> Result<&ColumnValue> {
        self.values
            .get(index)
            .ok_or_else(|| Error::InvalidColumn(format!("index {index} out of bounds")))
    }

    /// Zero-based index of a column, matching names case-insensitively.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .find(name)
            .ok_or_else(|| Error::InvalidColumn(format!("column '{name}' not found")))
    }

    /// Get a value by column index with type conversion.
    ///
    /// Uses the `FromSql` trait; ask for an `Option<T>` to accept NULL.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T> {
        Ok(T::from_sql(self.value(index)?)?)
    }

    /// Get a value by column name with type conversion.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T> {
        self.get(self.index_of(name)?)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[ColumnValue] {
        &self.values
    }

    /// Take the values out of the row.
    #[must_use]
    pub fn into_values(self) -> Vec<ColumnValue> {
        self.values
    }
}
