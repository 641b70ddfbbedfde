use thiserror::Error;

/// All the ways a harvesting run can fail outright
///
/// API failures are not in here on purpose: they come back as outcomes and
/// only ever shrink the output.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("GitHub token not provided. Set GITHUB_TOKEN or pass --token")]
    MissingCredential,

    #[error("API client error: {0}")]
    ApiError(#[from] repominer_api::ApiError),

    #[error("Malformed CSV at line {line}: {message}")]
    CsvError { line: usize, message: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
