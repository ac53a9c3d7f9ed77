//! Protocol error types.

use crate::entity::EntityKind;
use std::fmt;
use thiserror::Error;

/// Direction of a field-name translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local (camelCase) to remote (snake_case).
    ToRemote,
    /// Remote (snake_case) to local (camelCase).
    ToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToRemote => f.write_str("local to remote"),
            Self::ToLocal => f.write_str("remote to local"),
        }
    }
}

/// Errors produced while translating or decoding sync data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field has no declared counterpart in the field map.
    #[error("{kind}: field '{field}' is not mapped ({direction})")]
    UnmappedField {
        /// Entity kind being translated.
        kind: EntityKind,
        /// Offending field name.
        field: String,
        /// Translation direction.
        direction: Direction,
    },

    /// A document could not be read as an entity record.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// An entity type name outside the tracked set.
    #[error("unknown entity type: {0}")]
    UnknownKind(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedRecord(err.to_string())
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
