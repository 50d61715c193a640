//! Connection, cursor, and query engine.

mod cancel;
mod connection;
mod cursor;
mod io;
mod query;
mod statement;
mod stream;
mod transaction;

pub use cancel::CancelToken;
pub use connection::{Connection, Notification};
pub use cursor::Cursor;
pub use statement::PreparedStatement;

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::FieldDescription;
use crate::types::Value;

/// Column metadata shared by every row of one result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    name_to_index: HashMap<String, usize>,
    names: Vec<String>,
    oids: Vec<u32>,
}

impl ColumnInfo {
    pub(crate) fn from_fields(fields: &[FieldDescription]) -> Self {
        let mut name_to_index = HashMap::with_capacity(fields.len());
        let mut names = Vec::with_capacity(fields.len());
        let mut oids = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            name_to_index.insert(field.name.clone(), i);
            names.push(field.name.clone());
            oids.push(field.type_oid);
        }
        Self { name_to_index, names, oids }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn type_oids(&self) -> &[u32] {
        &self.oids
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }
}

/// One decoded row: values in descriptor order plus shared column metadata.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) values: Vec<Value>,
    pub(crate) columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.values.get(self.columns.index_of(name)?)
    }

    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, oid: u32) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: 0,
            column_attr: 0,
            type_oid: oid,
            type_size: 0,
            type_modifier: -1,
            format: 0,
        }
    }

    #[test]
    fn test_row_access_by_name_and_index() {
        let info = Arc::new(ColumnInfo::from_fields(&[field("id", 23), field("name", 25)]));
        let row = Row {
            values: vec![Value::Int4(1), Value::Text("hello".to_string())],
            columns: info,
        };
        assert_eq!(row.get(0), Some(&Value::Int4(1)));
        assert_eq!(row.get_named("name"), Some(&Value::Text("hello".to_string())));
        assert_eq!(row.get_named("missing"), None);
        assert_eq!(row.columns().type_oids(), &[23, 25]);
    }
}
