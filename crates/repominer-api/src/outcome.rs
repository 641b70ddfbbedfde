use serde_json::Value;
use tracing::{error, info, warn};

/// What a single API call resolved to, after transport retries
///
/// Every expected HTTP failure class gets its own variant so callers can
/// decide per field whether to carry on or stop.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    Success(Value),
    /// Quota exhausted. `reset_at` is the epoch second the quota refills
    RateLimited { reset_at: Option<i64> },
    NotFound,
    Unauthorized,
    Conflict,
    NoContent,
    LegallyUnavailable,
    /// Anything else. `None` when the transport never produced a response
    OtherError(Option<u16>),
}

/// Payload-free discriminant, handy for summaries and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    RateLimited,
    NotFound,
    Unauthorized,
    Conflict,
    NoContent,
    LegallyUnavailable,
    OtherError,
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Success => write!(f, "success"),
            OutcomeKind::RateLimited => write!(f, "rate limited"),
            OutcomeKind::NotFound => write!(f, "not found"),
            OutcomeKind::Unauthorized => write!(f, "unauthorized"),
            OutcomeKind::Conflict => write!(f, "conflict"),
            OutcomeKind::NoContent => write!(f, "no content"),
            OutcomeKind::LegallyUnavailable => write!(f, "unavailable for legal reasons"),
            OutcomeKind::OtherError => write!(f, "other error"),
        }
    }
}

impl ApiOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ApiOutcome::Success(_) => OutcomeKind::Success,
            ApiOutcome::RateLimited { .. } => OutcomeKind::RateLimited,
            ApiOutcome::NotFound => OutcomeKind::NotFound,
            ApiOutcome::Unauthorized => OutcomeKind::Unauthorized,
            ApiOutcome::Conflict => OutcomeKind::Conflict,
            ApiOutcome::NoContent => OutcomeKind::NoContent,
            ApiOutcome::LegallyUnavailable => OutcomeKind::LegallyUnavailable,
            ApiOutcome::OtherError(_) => OutcomeKind::OtherError,
        }
    }

    /// Consume the outcome, keeping only a successful payload
    pub fn into_payload(self) -> Option<Value> {
        match self {
            ApiOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// Seconds until the quota resets, never negative
    pub fn wait_seconds(&self, now: i64) -> Option<i64> {
        match self {
            ApiOutcome::RateLimited {
                reset_at: Some(reset_at),
            } => Some((reset_at - now).max(0)),
            _ => None,
        }
    }

    /// Write this outcome to the diagnostic log
    pub fn record(&self, url: &str) {
        match self {
            ApiOutcome::Success(_) => info!(url, "200 OK"),
            ApiOutcome::NoContent => {
                info!(url, "HTTP 204 - No Content. This could be expected, but investigate.")
            }
            ApiOutcome::RateLimited { reset_at } => {
                let now = chrono::Utc::now().timestamp();
                match reset_at {
                    Some(_) => {
                        let minutes = self.wait_seconds(now).unwrap_or(0) / 60;
                        warn!(
                            url,
                            "Rate limit exceeded! Please wait and try again after {} minutes.",
                            minutes
                        );
                    }
                    None => warn!(url, "Rate limit exceeded! No reset time was supplied."),
                }
            }
            ApiOutcome::NotFound => error!(url, "Error 404: Resource not found."),
            ApiOutcome::Unauthorized => {
                error!(url, "Unauthorized (401) - Check your GitHub token.")
            }
            ApiOutcome::Conflict => error!(
                url,
                "HTTP 409 - Conflict. The resource exists in a conflicting state or is busy."
            ),
            ApiOutcome::LegallyUnavailable => {
                error!(url, "Error 451: Unavailable For Legal Reasons.")
            }
            ApiOutcome::OtherError(Some(status)) => {
                error!(url, "Error fetching data: {}", status)
            }
            ApiOutcome::OtherError(None) => {
                error!(url, "Error fetching data: no response after retries")
            }
        }
    }
}
