//! Error type shared by every pipeline operation.

use thiserror::Error;

/// Why a pipeline operation was refused or failed.
///
/// Mutations are all-or-nothing: whenever one of these is returned, nothing was
/// persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrmError {
    /// Input failed a field-level rule
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// Human readable reason
        message: String,
    },

    /// The acting principal may not perform the operation
    #[error("Permission denied: {0}")]
    Permission(String),

    /// The operation conflicts with the current state of the data
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// A storage or collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CrmError {
    /// Shorthand for a [`CrmError::Validation`]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a [`CrmError::NotFound`]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Metric label for the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Permission(_) => "permission",
            Self::Conflict(_) => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CrmError>;
