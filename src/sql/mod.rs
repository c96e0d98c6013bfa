mod ddl;
mod validation;

pub use ddl::{render_column_definition, render_create_table};
pub use validation::{
    ensure_identifier, ensure_row_id, ensure_search_fragment, validate_identifier,
    validate_row_id, validate_search_fragment,
};

/// Wrap an identifier in double quotes, so that case is preserved and reserved words are usable.
///
/// Only ever call this on identifiers that have passed `validate_identifier`. Those can't contain
/// a double quote, so no escaping is needed.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}
