use thiserror::Error;

/// Failures building the client. Request failures are never errors,
/// they come back as an `ApiOutcome`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Credential contains characters not allowed in a header")]
    InvalidCredential,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;
