//! Error taxonomy for the Stratus core library.
//!
//! Provider failures are never errors here: they travel as
//! [`Diagnostics`](crate::diagnostics::Diagnostics). These variants cover
//! misuse of the library itself.

/// Stratus core errors.
#[derive(Debug, thiserror::Error)]
pub enum StratusError {
    #[error("invalid classification rule pattern '{pattern}': {source}")]
    InvalidRule {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Stratus core operations.
pub type Result<T> = std::result::Result<T, StratusError>;
