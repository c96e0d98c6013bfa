//! Dynamic table engine: DDL and DML against tables whose shape is only known at runtime.
//!
//! Table and column names can't be bound as parameters, so every name that ends up in SQL text
//! goes through `crate::sql` validation first. Values always travel as bound parameters.

mod read;
mod write;

pub use read::{ReadQuery, SortOrder};

use serde::Serialize;

use crate::constructs::{Row, Value};
use crate::errors::{Error, Result};
use crate::sql::ensure_identifier;
use crate::storage::{system::is_reserved_table_name, Database};

/// Result of a DDL operation. Datastore failures are reported here instead of as errors.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
pub struct TableOutcome {
    pub message: String,
    pub error: bool,
}

impl TableOutcome {
    pub fn success(message: String) -> Self {
        TableOutcome {
            message,
            error: false,
        }
    }

    pub fn failure(message: String) -> Self {
        TableOutcome {
            message,
            error: true,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    database: Database,
}

impl Engine {
    pub fn new(database: Database) -> Self {
        Engine { database }
    }
}

fn ensure_table_name(table_name: &str) -> Result<()> {
    ensure_identifier("table name", table_name)?;
    if is_reserved_table_name(table_name) {
        return Err(Error::Validation(format!(
            "Table name `{}` is reserved",
            table_name
        )));
    }
    Ok(())
}

fn ensure_column_names<'a>(names: impl IntoIterator<Item = &'a String>) -> Result<()> {
    for name in names {
        ensure_identifier("column name", name)?;
    }
    Ok(())
}

fn column_names(statement: &rusqlite::Statement<'_>) -> Vec<String> {
    statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect()
}

fn read_row(row: &rusqlite::Row<'_>, column_names: &[String]) -> rusqlite::Result<Row> {
    let mut values = Row::with_capacity(column_names.len());
    for (index, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), Value::from(row.get_ref(index)?));
    }
    Ok(values)
}
