//! Error types for the cbma-contrast library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum CbmaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("NIfTI error: {0}")]
    Nifti(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Affine mismatch: {0}")]
    AffineMismatch(String),

    #[error("Reference space mismatch: {0}")]
    SpaceMismatch(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, CbmaError>;
