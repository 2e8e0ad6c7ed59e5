use std::path::PathBuf;

/// Errors raised while reading content metadata or resolving assets.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("no built bundle for '{0}'")]
    BundleNotFound(String),

    #[error("invalid asset descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("failed to parse manifest '{0}': {1}")]
    Manifest(PathBuf, String),

    #[error("failed to parse config '{0}': {1}")]
    Config(PathBuf, String),

    #[error("I/O error reading '{0}': {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ContentError {
    fn from(err: serde_json::Error) -> Self {
        ContentError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ContentError {
    fn from(err: toml::de::Error) -> Self {
        ContentError::Serialization(err.to_string())
    }
}
