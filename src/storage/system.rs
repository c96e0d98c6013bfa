use tracing::*;

use crate::constructs::{ColumnSpec, DataType};
use crate::errors::Result;
use crate::sql::{render_column_definition, render_create_table};

use super::Database;

/// Prefix SQLite reserves for its own tables.
const DATASTORE_RESERVED_PREFIX: &str = "sqlite_";

pub enum SystemTable {
    /// Registry of user-defined tables.
    Schemas,
}

impl SystemTable {
    /// Array of all system tables.
    pub const ALL: [Self; 1] = [Self::Schemas];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Schemas => "_tabula_schemas",
        }
    }

    pub fn get_definition(&self) -> Vec<ColumnSpec> {
        match self {
            Self::Schemas => vec![
                ColumnSpec::new("id", DataType::Uuid).primary_key().not_null(),
                ColumnSpec::new("name", DataType::Varchar).unique().not_null(),
                ColumnSpec::new("metadata", DataType::Json).not_null(),
                ColumnSpec::new("createdAt", DataType::Timestamp).not_null(),
                ColumnSpec::new("updatedAt", DataType::Timestamp),
            ],
        }
    }

    /// Columns compared the way the datastore compares identifiers.
    fn case_insensitive_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Schemas => &["name"],
        }
    }

    pub fn create_statement(&self) -> String {
        let case_insensitive = self.case_insensitive_columns();
        render_create_table(
            self.name(),
            self.get_definition().iter().map(|column| {
                let definition = render_column_definition(column);
                if case_insensitive.contains(&column.name.as_str()) {
                    format!("{} COLLATE NOCASE", definition)
                } else {
                    definition
                }
            }),
        )
    }
}

/// Whether a user-defined table may not take this name.
pub fn is_reserved_table_name(table_name: &str) -> bool {
    SystemTable::ALL
        .iter()
        .any(|table| table.name().eq_ignore_ascii_case(table_name))
        || table_name
            .to_lowercase()
            .starts_with(DATASTORE_RESERVED_PREFIX)
}

/// Create all system tables that don't exist yet.
pub fn bootstrap(database: &Database) -> Result<()> {
    let conn = database.connection()?;
    for table in SystemTable::ALL {
        conn.execute_batch(&table.create_statement())?;
        debug!("Ensured system table `{}`", table.name());
    }
    Ok(())
}
