// GitHub API plumbing: one resilient client, its outcomes, and the payloads we read
pub mod client;
pub mod error;
pub mod outcome;
pub mod retry;
pub mod types;

// Re-export common types
pub use client::{ApiRequest, Credential, Fetch, GitHubClient, GITHUB_API_BASE};
#[cfg(any(test, feature = "test-support"))]
pub use client::MockFetch;
pub use error::ApiError;
pub use outcome::{ApiOutcome, OutcomeKind};
pub use retry::{RetryConfig, MAX_ATTEMPTS};
