use rusqlite::{ffi, params, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::*;
use uuid::Uuid;

use crate::constructs::{parse_columns, ColumnSpec};
use crate::errors::{Error, Result};

use super::{system::SystemTable, Database};

/// Persisted description of one user-defined table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub id: Uuid,
    pub name: String,
    /// Serialized column metadata, kept verbatim.
    pub metadata: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl SchemaRecord {
    /// Parse the column metadata. Whether an empty list is acceptable is up to the caller.
    pub fn columns(&self) -> Result<Vec<ColumnSpec>> {
        parse_columns(&self.metadata)
    }
}

/// CRUD over schema records. Knows nothing about the physical tables they describe.
#[derive(Clone)]
pub struct Registry {
    database: Database,
}

const SELECT_RECORD: &str = "SELECT \"id\", \"name\", \"metadata\", \"createdAt\", \"updatedAt\" FROM";

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|error| Error::SchemaCorrupt(format!("Invalid registry timestamp `{}`: {}", raw, error)))
}

/// Raw registry row, before the text columns are parsed.
type RawRecord = (String, String, String, String, Option<String>);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_record((id, name, metadata, created_at, updated_at): RawRecord) -> Result<SchemaRecord> {
    Ok(SchemaRecord {
        id: Uuid::parse_str(&id)
            .map_err(|error| Error::SchemaCorrupt(format!("Invalid registry id `{}`: {}", id, error)))?,
        name,
        metadata,
        created_at: parse_timestamp(&created_at)?,
        updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl Registry {
    pub fn new(database: Database) -> Self {
        Registry { database }
    }

    fn table() -> String {
        format!("\"{}\"", SystemTable::Schemas.name())
    }

    pub fn create(&self, name: &str, metadata: String) -> Result<SchemaRecord> {
        let now = OffsetDateTime::now_utc();
        let record = SchemaRecord {
            id: Uuid::from(ulid::Ulid::new()),
            name: name.to_string(),
            metadata,
            created_at: now,
            updated_at: None,
        };
        let created_at = now
            .format(&Rfc3339)
            .map_err(|error| Error::Internal(format!("Could not format timestamp: {}", error)))?;
        let conn = self.database.connection()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (\"id\", \"name\", \"metadata\", \"createdAt\") VALUES (?1, ?2, ?3, ?4)",
                Self::table()
            ),
            params![record.id.to_string(), record.name, record.metadata, created_at],
        );
        match inserted {
            Ok(_) => {
                debug!("Registered schema `{}` as {}", record.name, record.id);
                Ok(record)
            }
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(Error::DuplicateName(format!("Duplicate table name `{}`", name)))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Table names are matched case-insensitively, the same way the datastore resolves them.
    pub fn find_by_name(&self, name: &str) -> Result<Option<SchemaRecord>> {
        let conn = self.database.connection()?;
        let raw = conn
            .query_row(
                &format!("{} {} WHERE \"name\" = ?1 COLLATE NOCASE", SELECT_RECORD, Self::table()),
                [name],
                read_raw,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<SchemaRecord>> {
        // Registry ids are always UUIDs, so anything else can't be present
        let id = match Uuid::parse_str(id) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };
        let conn = self.database.connection()?;
        let raw = conn
            .query_row(
                &format!("{} {} WHERE \"id\" = ?1", SELECT_RECORD, Self::table()),
                [id.to_string()],
                read_raw,
            )
            .optional()?;
        raw.map(into_record).transpose()
    }

    /// All records in creation order.
    pub fn list_all(&self) -> Result<Vec<SchemaRecord>> {
        let conn = self.database.connection()?;
        let mut statement =
            conn.prepare(&format!("{} {} ORDER BY rowid", SELECT_RECORD, Self::table()))?;
        let raw_records = statement
            .query_map([], read_raw)?
            .collect::<rusqlite::Result<Vec<RawRecord>>>()?;
        raw_records.into_iter().map(into_record).collect()
    }

    /// Removing an absent record is a no-op.
    pub fn remove(&self, id: &Uuid) -> Result<()> {
        let conn = self.database.connection()?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE \"id\" = ?1", Self::table()),
            [id.to_string()],
        )?;
        debug!("Removed {} registry record(s) with id {}", removed, id);
        Ok(())
    }
}
