use crate::constructs::ColumnSpec;

use super::quote_identifier;

/// `"<name>" <TYPE>` followed by constraint tokens in the fixed order PRIMARY KEY, UNIQUE, NOT NULL.
pub fn render_column_definition(column: &ColumnSpec) -> String {
    let mut definition = format!(
        "{} {}",
        quote_identifier(&column.name),
        column.data_type.sql_keyword()
    );
    if column.is_primary_key {
        definition.push_str(" PRIMARY KEY");
    }
    if column.is_unique {
        definition.push_str(" UNIQUE");
    }
    if column.is_not_null {
        definition.push_str(" NOT NULL");
    }
    definition
}

/// Single `CREATE TABLE IF NOT EXISTS` statement out of already rendered column definitions.
pub fn render_create_table<I>(table_name: &str, column_definitions: I) -> String
where
    I: IntoIterator<Item = String>,
{
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(table_name),
        column_definitions.into_iter().collect::<Vec<_>>().join(", ")
    )
}
