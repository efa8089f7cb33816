//! Configuration errors.

/// Why a `kiln.toml` could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read kiln.toml: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML or does not match the schema.
    #[error("invalid kiln.toml: {0}")]
    ParseError(String),

    /// A setting that must be non-empty is empty.
    #[error("missing required setting `{0}`")]
    MissingField(String),

    /// A setting is out of range.
    #[error("invalid setting: {0}")]
    ValidationError(String),
}
