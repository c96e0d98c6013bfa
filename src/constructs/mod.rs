pub mod components;
pub mod functions;

pub use components::{
    conform_row, parse_columns, serialize_columns, ColumnSpec, DataType, Row, SchemaDefinition,
    Validatable, Value,
};
