//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce a usable [`ChorusSettings`](crate::ChorusSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON or does not match the schema.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A field holds a value the server cannot run with.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase path of the field, as written in the file.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The offending field for validation failures.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
