use rusqlite::params;
use serde::{de, Deserialize, Deserializer};
use std::{fmt, str::FromStr};
use tracing::*;

use crate::constructs::Row;
use crate::errors::{Error, Result};
use crate::sql::{ensure_identifier, ensure_search_fragment, quote_identifier};

use super::{column_names, ensure_table_name, read_row, Engine};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        })
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(candidate: &str) -> std::result::Result<Self, Self::Err> {
        match candidate.to_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!(
                "`{}` is not a sort order, expected ASC or DESC",
                candidate
            )),
        }
    }
}

impl<'de> Deserialize<'de> for SortOrder {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        SortOrder::from_str(&raw).map_err(de::Error::custom)
    }
}

/// Filtering, ordering and pagination of a table read.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadQuery {
    /// Raw SQL condition placed after WHERE.
    pub search: Option<String>,
    pub sort_column: Option<String>,
    pub sort_order: SortOrder,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl Default for ReadQuery {
    fn default() -> Self {
        ReadQuery {
            search: None,
            sort_column: None,
            sort_order: SortOrder::Asc,
            page: 1,
            limit: 10,
        }
    }
}

impl ReadQuery {
    /// `(limit, offset)`, with page and limit coerced to at least 1.
    ///
    /// Pages whose offset doesn't fit the datastore's integer range are a validation error.
    pub fn limit_offset(&self) -> Result<(i64, i64)> {
        let page = i64::from(self.page.max(1));
        let limit = i64::from(self.limit.max(1));
        let offset = (page - 1).checked_mul(limit).ok_or_else(|| {
            Error::Validation(format!(
                "Page {} with limit {} is out of range",
                self.page, self.limit
            ))
        })?;
        Ok((limit, offset))
    }
}

impl Engine {
    /// Read one page of rows. No matches is an empty vector, not an error.
    pub fn read_rows(&self, table_name: &str, query: &ReadQuery) -> Result<Vec<Row>> {
        ensure_table_name(table_name)?;
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty());
        let sort_column = query.sort_column.as_deref().filter(|column| !column.is_empty());
        if let Some(sort_column) = sort_column {
            ensure_identifier("sort column", sort_column)?;
        }
        if let Some(search) = search {
            ensure_search_fragment(search)?;
        }
        let (limit, offset) = query.limit_offset()?;

        let mut statement = format!("SELECT * FROM {}", quote_identifier(table_name));
        if let Some(search) = search {
            statement.push_str(&format!(" WHERE {}", search));
        }
        if let Some(sort_column) = sort_column {
            statement.push_str(&format!(
                " ORDER BY {} {}",
                quote_identifier(sort_column),
                query.sort_order
            ));
        }
        statement.push_str(" LIMIT ?1 OFFSET ?2");

        let conn = self.database.connection()?;
        debug!("Executing query: {} [{}, {}]", statement, limit, offset);
        let mut prepared = conn.prepare(&statement)?;
        let names = column_names(&prepared);
        let rows = prepared
            .query_map(params![limit, offset], |row| read_row(row, &names))?
            .collect::<rusqlite::Result<Vec<Row>>>()?;
        Ok(rows)
    }
}
