use indexmap::IndexMap;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::HashSet, fmt, str::FromStr};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};

use crate::errors::Error;
use crate::sql::validate_identifier;

/// Names of the columns the engine adds to every dynamic table.
pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "createdAt";
pub const UPDATED_AT_COLUMN: &str = "updatedAt";
pub const MANAGED_COLUMN_NAMES: [&str; 3] = [ID_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// Catalogue of column types a user can pick from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DataType {
    Uuid,
    Text,
    Varchar,
    Integer,
    BigInt,
    Real,
    Boolean,
    Timestamp,
    Date,
    Json,
}

impl DataType {
    /// Keyword used for this type in DDL.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Uuid => "UUID",
            Self::Text => "TEXT",
            Self::Varchar => "VARCHAR",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMP",
            Self::Date => "DATE",
            Self::Json => "JSON",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_keyword())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(candidate: &str) -> std::result::Result<Self, Self::Err> {
        match candidate.trim().to_lowercase().as_str() {
            "uuid" => Ok(Self::Uuid),
            "text" | "string" => Ok(Self::Text),
            "varchar" => Ok(Self::Varchar),
            "integer" | "int" => Ok(Self::Integer),
            "bigint" => Ok(Self::BigInt),
            "real" | "float" | "double" => Ok(Self::Real),
            "boolean" | "bool" => Ok(Self::Boolean),
            "timestamp" | "datetime" => Ok(Self::Timestamp),
            "date" => Ok(Self::Date),
            "json" | "jsonb" => Ok(Self::Json),
            _ => Err(format!(
                "`{}` does not refer to a supported type",
                candidate
            )),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.sql_keyword())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DataType::from_str(&raw).map_err(de::Error::custom)
    }
}

/// One column of a user-defined table.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_not_null: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnSpec {
            name: name.into(),
            data_type,
            is_primary_key: false,
            is_unique: false,
            is_not_null: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_not_null = true;
        self
    }

    /// Metadata entries of the engine-managed columns, as `(leading, trailing)`.
    ///
    /// Stored metadata is always `leading ++ user columns ++ trailing`.
    pub fn managed() -> (Vec<ColumnSpec>, Vec<ColumnSpec>) {
        (
            vec![ColumnSpec::new(ID_COLUMN, DataType::Uuid).primary_key().unique()],
            vec![
                ColumnSpec::new(CREATED_AT_COLUMN, DataType::Timestamp),
                ColumnSpec::new(UPDATED_AT_COLUMN, DataType::Timestamp),
            ],
        )
    }
}

pub trait Validatable {
    /// Make sure that this definition (self) actually makes sense.
    fn validate(&self) -> Result<(), Error>;
}

impl Validatable for ColumnSpec {
    fn validate(&self) -> Result<(), Error> {
        if !validate_identifier(&self.name) {
            return Err(Error::Validation(format!(
                "Invalid column name `{}`",
                self.name
            )));
        }
        if MANAGED_COLUMN_NAMES.contains(&self.name.as_str()) {
            return Err(Error::Validation(format!(
                "Column name `{}` is reserved for an engine-managed column",
                self.name
            )));
        }
        Ok(())
    }
}

/// What a client submits to create a dynamic table.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

impl SchemaDefinition {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        SchemaDefinition {
            table_name: table_name.into(),
            columns,
        }
    }

    /// Full metadata of the table: managed id, then the user's columns, then managed timestamps.
    pub fn metadata(&self) -> Vec<ColumnSpec> {
        let (leading, trailing) = ColumnSpec::managed();
        leading
            .into_iter()
            .chain(self.columns.iter().cloned())
            .chain(trailing)
            .collect()
    }
}

impl Validatable for SchemaDefinition {
    fn validate(&self) -> Result<(), Error> {
        if !validate_identifier(&self.table_name) {
            return Err(Error::Validation(format!(
                "Invalid table name `{}`",
                self.table_name
            )));
        }
        let mut column_names: HashSet<&str> = HashSet::new();
        for (column_index, column) in self.columns.iter().enumerate() {
            if !column_names.insert(column.name.as_str()) {
                return Err(Error::Validation(format!(
                    "There is more than one column with name `{}` in table definition",
                    column.name
                )));
            }
            if let Err(column_error) = column.validate() {
                return Err(Error::Validation(format!(
                    "Problem at column {}: {}",
                    column_index + 1,
                    column_error.message()
                )));
            }
        }
        Ok(())
    }
}

/// Serialize column metadata for the registry.
pub fn serialize_columns(columns: &[ColumnSpec]) -> Result<String, Error> {
    Ok(serde_json::to_string(columns)?)
}

/// Parse column metadata coming from the registry. Order is preserved.
pub fn parse_columns(metadata: &str) -> Result<Vec<ColumnSpec>, Error> {
    Ok(serde_json::from_str(metadata)?)
}

/// A single cell of a dynamic table.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Timestamp(OffsetDateTime),
    Json(serde_json::Value),
    Blob(Vec<u8>),
}

/// A row of a dynamic table, keyed by column name in table order.
pub type Row = IndexMap<String, Value>;

impl Value {
    /// Reinterpret a value read from storage according to the declared column type.
    ///
    /// Storage only knows integers, reals, text and blobs, so booleans, JSON and timestamps are
    /// recovered here. Values that don't fit the declared type are left untouched.
    pub fn conform(self, data_type: DataType) -> Value {
        match (data_type, self) {
            (DataType::Boolean, Value::Integer(number)) => Value::Boolean(number != 0),
            (DataType::Boolean, Value::Text(text)) => match text.to_lowercase().as_str() {
                "true" | "t" | "1" => Value::Boolean(true),
                "false" | "f" | "0" => Value::Boolean(false),
                _ => Value::Text(text),
            },
            (DataType::Json, Value::Text(text)) => match serde_json::from_str(&text) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(text),
            },
            (DataType::Json, Value::Integer(number)) => Value::Json(number.into()),
            (DataType::Timestamp, Value::Text(text)) => match parse_timestamp(&text) {
                Some(timestamp) => Value::Timestamp(timestamp),
                None => Value::Text(text),
            },
            (_, value) => value,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    if let Ok(timestamp) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(timestamp);
    }
    // SQLite's own CURRENT_TIMESTAMP format
    PrimitiveDateTime::parse(text, format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Conform every cell of a row to the declared column types. Unknown columns stay as read.
pub fn conform_row(row: Row, columns: &[ColumnSpec]) -> Row {
    row.into_iter()
        .map(|(name, value)| {
            let value = match columns.iter().find(|column| column.name == name) {
                Some(column) => value.conform(column.data_type),
                None => value,
            };
            (name, value)
        })
        .collect()
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(boolean) => Value::Boolean(boolean),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => Value::Integer(integer),
                None => Value::Real(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::Text(text),
            json @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Json(json)
            }
        }
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(integer) => Value::Integer(integer),
            ValueRef::Real(real) => Value::Real(real),
            ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(blob) => Value::Blob(blob.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(integer) => ToSqlOutput::Owned(SqlValue::Integer(*integer)),
            Value::Real(real) => ToSqlOutput::Owned(SqlValue::Real(*real)),
            Value::Text(text) => ToSqlOutput::Borrowed(ValueRef::Text(text.as_bytes())),
            Value::Boolean(boolean) => ToSqlOutput::Owned(SqlValue::Integer(*boolean as i64)),
            Value::Timestamp(timestamp) => ToSqlOutput::Owned(SqlValue::Text(
                timestamp
                    .format(&Rfc3339)
                    .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?,
            )),
            Value::Json(json) => ToSqlOutput::Owned(SqlValue::Text(json.to_string())),
            Value::Blob(blob) => ToSqlOutput::Borrowed(ValueRef::Blob(blob)),
        })
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Integer(integer) => serializer.serialize_i64(*integer),
            Value::Real(real) => serializer.serialize_f64(*real),
            Value::Text(text) => serializer.serialize_str(text),
            Value::Boolean(boolean) => serializer.serialize_bool(*boolean),
            Value::Timestamp(timestamp) => {
                let formatted = timestamp
                    .format(&Rfc3339)
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_str(&formatted)
            }
            Value::Json(json) => json.serialize(serializer),
            Value::Blob(blob) => serializer.serialize_bytes(blob),
        }
    }
}
