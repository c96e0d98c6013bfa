use std::fmt;

use time::OffsetDateTime;
use ulid::Ulid;
use uuid::Uuid;

use super::components::Value;

/// Value generators for engine-managed columns.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Function {
    /// Time-ordered, globally unique identifier in UUID text form.
    Ulid,
    Now,
}

impl Function {
    pub fn call(&self) -> Value {
        match self {
            Self::Ulid => Value::Text(Uuid::from(Ulid::new()).to_string()),
            Self::Now => Value::Timestamp(OffsetDateTime::now_utc()),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function `{}`",
            match self {
                Self::Ulid => "ULID",
                Self::Now => "NOW",
            }
        )
    }
}
