use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited by Apify: {0}")]
    RateLimited(String),

    /// A collect run finished without the requested record.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run failed with status: {0}")]
    RunFailed(String),

    #[error("Page {page} is beyond the search page limit of {max}")]
    PageLimit { page: u32, max: u32 },
}

impl ApifyError {
    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApifyError::Network(_) | ApifyError::Timeout(_) | ApifyError::RateLimited(_) => true,
            ApifyError::Api { status, .. } => *status >= 500,
            ApifyError::RunFailed(status) => status == "TIMED-OUT",
            ApifyError::NotFound(_) | ApifyError::Parse(_) | ApifyError::PageLimit { .. } => false,
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApifyError::Timeout(err.to_string())
        } else {
            ApifyError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}
