use rusqlite::{params_from_iter, OptionalExtension};
use tracing::*;

use crate::constructs::{
    components::{CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN},
    functions::Function,
    ColumnSpec, Row, Value,
};
use crate::errors::{Error, Result};
use crate::sql::{ensure_row_id, quote_identifier, render_column_definition, render_create_table};
use crate::storage::table_exists;

use super::{column_names, ensure_column_names, ensure_table_name, read_row, Engine, TableOutcome};

/// DDL of the columns every dynamic table starts with.
fn managed_column_definitions() -> [String; 3] {
    [
        format!("{} UUID PRIMARY KEY NOT NULL", quote_identifier(ID_COLUMN)),
        format!(
            "{} TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            quote_identifier(CREATED_AT_COLUMN)
        ),
        format!("{} TIMESTAMP", quote_identifier(UPDATED_AT_COLUMN)),
    ]
}

fn delete_returning(
    conn: &mut rusqlite::Connection,
    statement: &str,
    id: &str,
) -> rusqlite::Result<Option<Row>> {
    // Dropping the transaction without committing rolls it back
    let transaction = conn.transaction()?;
    let deleted = {
        let mut prepared = transaction.prepare(statement)?;
        let names = column_names(&prepared);
        prepared
            .query_row([id], |row| read_row(row, &names))
            .optional()?
    };
    if deleted.is_some() {
        transaction.commit()?;
    }
    Ok(deleted)
}

impl Engine {
    /// Materialize a table out of user column specs, behind the engine-managed columns.
    ///
    /// Invalid names fail before any SQL is built. A statement the datastore rejects yields a
    /// failed `TableOutcome` carrying the datastore's message.
    pub fn create_table(&self, table_name: &str, columns: &[ColumnSpec]) -> Result<TableOutcome> {
        ensure_table_name(table_name)?;
        ensure_column_names(columns.iter().map(|column| &column.name))?;
        let statement = render_create_table(
            table_name,
            managed_column_definitions()
                .into_iter()
                .chain(columns.iter().map(render_column_definition)),
        );
        let conn = self.database.connection()?;
        debug!("Executing DDL: {}", statement);
        match conn.execute_batch(&statement) {
            Ok(()) => {
                info!("🧱 Created table `{}`", table_name);
                Ok(TableOutcome::success(format!(
                    "Table \"{}\" created successfully.",
                    table_name
                )))
            }
            Err(error) => {
                warn!("Failed to create table `{}`: {}", table_name, error);
                Ok(TableOutcome::failure(error.to_string()))
            }
        }
    }

    /// Insert one row and return it as stored, engine-managed columns included.
    pub fn insert_row(&self, table_name: &str, mut data: Row) -> Result<Row> {
        ensure_table_name(table_name)?;
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }
        ensure_column_names(data.keys())?;
        match data.get(ID_COLUMN) {
            Some(Value::Text(id)) => ensure_row_id(id)?,
            Some(_) => {
                return Err(Error::Validation(
                    "Row id must be a UUID string".to_string(),
                ))
            }
            None => {
                debug!("Filling `{}` with {}", ID_COLUMN, Function::Ulid);
                data.insert(ID_COLUMN.to_string(), Function::Ulid.call());
            }
        }
        let column_list = data
            .keys()
            .map(|name| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=data.len())
            .map(|position| format!("?{}", position))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote_identifier(table_name),
            column_list,
            placeholders
        );
        let conn = self.database.connection()?;
        debug!("Executing DML: {}", statement);
        let mut prepared = conn.prepare(&statement)?;
        let names = column_names(&prepared);
        let row = prepared.query_row(params_from_iter(data.values()), |row| read_row(row, &names))?;
        Ok(row)
    }

    /// Update the row with surrogate identifier `id`. Returns the number of affected rows.
    pub fn update_row(&self, table_name: &str, id: &str, data: Row) -> Result<usize> {
        ensure_table_name(table_name)?;
        ensure_row_id(id)?;
        if data.is_empty() {
            return Err(Error::EmptyPayload);
        }
        ensure_column_names(data.keys())?;
        let assignments = data
            .keys()
            .enumerate()
            .map(|(index, name)| format!("{} = ?{}", quote_identifier(name), index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let statement = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_identifier(table_name),
            assignments,
            quote_identifier(ID_COLUMN),
            data.len() + 1
        );
        let id_value = Value::Text(id.to_string());
        let conn = self.database.connection()?;
        debug!("Executing DML: {}", statement);
        let affected = conn.execute(
            &statement,
            params_from_iter(data.values().chain(std::iter::once(&id_value))),
        )?;
        Ok(affected)
    }

    /// Delete the row with surrogate identifier `id` and return it.
    ///
    /// Runs in its own transaction. Datastore failures are logged and reported generically.
    pub fn delete_row(&self, table_name: &str, id: &str) -> Result<Row> {
        ensure_row_id(id)?;
        ensure_table_name(table_name)?;
        let statement = format!(
            "DELETE FROM {} WHERE {} = ?1 RETURNING *",
            quote_identifier(table_name),
            quote_identifier(ID_COLUMN)
        );
        let mut conn = self.database.connection()?;
        debug!("Executing DML: {}", statement);
        match delete_returning(&mut conn, &statement, id) {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(Error::NotFound(format!(
                "Record not found in table `{}`",
                table_name
            ))),
            Err(error) => {
                error!(
                    "‼️ Error deleting record {} from `{}`: {}",
                    id, table_name, error
                );
                Err(Error::Internal("Failed to delete record".to_string()))
            }
        }
    }

    /// Drop a table. Destructive and not reversible.
    ///
    /// Existence is checked against the datastore catalog first, so an absent table is told apart
    /// from a failing drop. Indexes and triggers of the table go with it.
    pub fn drop_table(&self, table_name: &str) -> Result<TableOutcome> {
        ensure_table_name(table_name)?;
        let conn = self.database.connection()?;
        if !table_exists(&conn, table_name)? {
            return Ok(TableOutcome::failure(format!(
                "Table \"{}\" does not exist.",
                table_name
            )));
        }
        match conn.execute_batch(&format!("DROP TABLE {}", quote_identifier(table_name))) {
            Ok(()) => {
                info!("🗑 Dropped table `{}`", table_name);
                Ok(TableOutcome::success(format!(
                    "Table \"{}\" deleted successfully.",
                    table_name
                )))
            }
            Err(error) => {
                warn!("Failed to drop table `{}`: {}", table_name, error);
                Ok(TableOutcome::failure(error.to_string()))
            }
        }
    }
}
