//! Error types for martgen.

use thiserror::Error;

/// The main error type for mart-generation operations.
#[derive(Debug, Error)]
pub enum MartError {
    /// A primary or foreign key for a referenced table could not be determined.
    #[error("Catalog resolution failed for table '{table}': {message}")]
    Catalog { table: String, message: String },

    /// The input specification names something the catalog does not know,
    /// or carries an unrecognized code.
    #[error("Specification error: {0}")]
    Specification(String),

    /// A transformation could not be compiled.
    #[error("Transformation '{transformation}' failed: {message}")]
    Transformation {
        transformation: String,
        message: String,
    },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A catalog metadata query failed.
    #[error("Metadata query failed: {0}")]
    Metadata(String),

    /// The destination script could not be opened or appended.
    #[error("Script emission failed: {0}")]
    Emission(#[from] std::io::Error),
}

impl MartError {
    /// Create a catalog-resolution error for the given table.
    pub fn catalog(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a specification error.
    pub fn spec(message: impl Into<String>) -> Self {
        Self::Specification(message.into())
    }

    /// Create a transformation error.
    pub fn transformation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transformation {
            transformation: name.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for mart-generation operations.
pub type MartResult<T> = Result<T, MartError>;
