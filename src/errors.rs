use serde::{ser::SerializeMap, Serialize, Serializer};
use thiserror::Error;
use tracing::*;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("ValidationError: {0}")]
    Validation(String),
    #[error("DuplicateNameError: {0}")]
    DuplicateName(String),
    #[error("NotFoundError: {0}")]
    NotFound(String),
    #[error("EmptyPayloadError: No valid fields provided")]
    EmptyPayload,
    #[error("SchemaInvalidError: {0}")]
    SchemaInvalid(String),
    #[error("SchemaCorruptError: {0}")]
    SchemaCorrupt(String),
    /// Statement rejected by the datastore. The message is safe to hand back to the caller.
    #[error("DatabaseError: {0}")]
    Database(String),
    /// Generic failure. The underlying cause is only ever logged.
    #[error("InternalError: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable kind, used as the `type` field of serialized errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateName(_) => "duplicate_name",
            Self::NotFound(_) => "not_found",
            Self::EmptyPayload => "empty_payload",
            Self::SchemaInvalid(_) => "schema_invalid",
            Self::SchemaCorrupt(_) => "schema_corrupt",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Validation(message)
            | Self::DuplicateName(message)
            | Self::NotFound(message)
            | Self::SchemaInvalid(message)
            | Self::SchemaCorrupt(message)
            | Self::Database(message)
            | Self::Internal(message) => message.clone(),
            Self::EmptyPayload => "No valid fields provided".to_string(),
        }
    }

    /// Whether the caller can fix the request. Everything but internal failures is.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", self.kind())?;
        map.serialize_entry("message", &self.message())?;
        map.end()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        debug!("Datastore rejected statement: {}", error);
        Self::Database(error.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(error: r2d2::Error) -> Self {
        error!("‼️ Could not check out a database connection: {}", error);
        Self::Internal("Database connection unavailable".to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::SchemaCorrupt(format!("Schema metadata could not be processed: {}", error))
    }
}
