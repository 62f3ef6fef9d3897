//! Error types for Syndic

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicError>;

#[derive(Error, Debug)]
pub enum SyndicError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal state transition for {entity} {id}: {from} -> {to}")]
    StateTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("Concurrent modification of {entity} {id}")]
    ConcurrencyConflict { entity: &'static str, id: String },

    #[error("No publisher registered for platform: {0}")]
    UnsupportedPlatform(String),
}

impl SyndicError {
    /// Returns the appropriate process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicError::Validation(_) => 3,
            SyndicError::NotFound(_) => 4,
            SyndicError::Config(_) | SyndicError::Database(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}
