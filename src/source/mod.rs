mod assets;
mod metrics;
mod retry;

pub use assets::AssetClient;
pub use assets::Filesystem;
pub use assets::HostMeta;
pub use assets::is_virtual_filesystem;
pub use metrics::MetricsClient;
pub use metrics::Sample;
pub use metrics::Series;
pub use retry::RetryPolicy;

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Upstream call outcomes, classified for the retry loop.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (connect refused, DNS, broken pipe).
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    /// The upstream answered with a non-2xx status.
    #[error("upstream rejected request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },
    /// Well-formed response body carrying a logical error.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// The call deadline was exhausted.
    #[error("deadline exceeded")]
    Timeout,
}

impl SourceError {
    /// 4xx is never retried; transport failures and 5xx are.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Unavailable(_) => true,
            SourceError::Rejected { status, .. } => *status >= 500,
            SourceError::Upstream(_) => false,
            SourceError::Timeout => false,
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Time left until the deadline; None once it passed.
pub fn remaining(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        return None;
    }
    return Some(deadline - now);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Unavailable("connect refused".into()).is_retryable());
        assert!(
            SourceError::Rejected {
                status: 503,
                detail: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SourceError::Rejected {
                status: 404,
                detail: String::new()
            }
            .is_retryable()
        );
        assert!(!SourceError::Upstream("bad query".into()).is_retryable());
        assert!(!SourceError::Timeout.is_retryable());
    }
}
