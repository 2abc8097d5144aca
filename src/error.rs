use thiserror::Error;

/// Everything that can go wrong while turning one XML document into rows.
///
/// Only `IdentityConflict` is recovered internally (by retrying the
/// transaction). Every other variant aborts the ingestion with nothing
/// persisted.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed xml: {0}")]
    MalformedInput(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("cannot convert {field}={value:?}: {reason}")]
    FieldConversion {
        field: String,
        value: String,
        reason: String,
    },
    #[error("lost race creating measurement site: {0}")]
    IdentityConflict(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] duckdb::Error),
    #[error("gave up after {attempts} conflicting attempts: {last}")]
    RetriesExhausted { attempts: u8, last: String },
}

/// The error categories a caller can tell apart.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    MalformedInput,
    SchemaMismatch,
    FieldConversion,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::FieldConversion => "field_conversion",
            ErrorKind::Persistence => "persistence",
        }
    }
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::MalformedInput(_) => ErrorKind::MalformedInput,
            IngestError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            IngestError::FieldConversion { .. } => ErrorKind::FieldConversion,
            // A conflict only escapes when the retry loop did not run, which
            // from the caller's point of view is a storage failure.
            IngestError::IdentityConflict(_)
            | IngestError::Persistence(_)
            | IngestError::RetriesExhausted { .. } => ErrorKind::Persistence,
        }
    }

    pub(crate) fn conversion(field: &str, value: &str, reason: impl ToString) -> Self {
        IngestError::FieldConversion {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
