use uuid::Uuid;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, SourcingError>;

#[derive(Debug, thiserror::Error)]
pub enum SourcingError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session is inactive: {0}")]
    SessionInactive(Uuid),

    #[error("Session {0} was modified concurrently")]
    SessionConflict(Uuid),

    #[error("Company list is empty")]
    EmptyCompanyList,

    #[error("Invalid batch config: {0}")]
    InvalidBatchConfig(String),

    #[error("Upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream call timed out after {0:?}")]
    UpstreamTimeout(std::time::Duration),

    #[error("Upstream record not found: {0}")]
    UpstreamNotFound(String),

    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourcingError {
    /// Rate limits, outages and timeouts clear up on their own; callers
    /// should re-invoke later rather than treat these as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourcingError::UpstreamRateLimited(_)
                | SourcingError::UpstreamUnavailable(_)
                | SourcingError::UpstreamTimeout(_)
        )
    }
}

impl From<apify_client::ApifyError> for SourcingError {
    fn from(err: apify_client::ApifyError) -> Self {
        use apify_client::ApifyError;
        match err {
            ApifyError::RateLimited(msg) => SourcingError::UpstreamRateLimited(msg),
            ApifyError::NotFound(id) => SourcingError::UpstreamNotFound(id),
            ApifyError::PageLimit { .. } | ApifyError::Parse(_) => {
                SourcingError::UpstreamRejected(err.to_string())
            }
            ApifyError::Api { status, .. } if status < 500 => {
                SourcingError::UpstreamRejected(err.to_string())
            }
            other if other.is_retryable() => SourcingError::UpstreamUnavailable(other.to_string()),
            other => SourcingError::UpstreamRejected(other.to_string()),
        }
    }
}
