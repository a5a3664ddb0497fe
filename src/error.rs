//! Error types for Gauntlet

use thiserror::Error;

/// Main error type for Gauntlet operations
#[derive(Debug, Error)]
pub enum GauntletError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u128),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("OOB error: {0}")]
    OobError(String),

    #[error("no scan context provided")]
    MissingContext,

    #[error("no profiles provided")]
    NoProfiles,

    #[error("no entrypoint finders provided")]
    NoEntrypointFinders,

    #[error("no requester builder provided")]
    NoRequesterBuilder,

    #[error("no file system provided")]
    NoFileSystem,
}

/// Result type alias for Gauntlet operations
pub type Result<T> = std::result::Result<T, GauntletError>;
