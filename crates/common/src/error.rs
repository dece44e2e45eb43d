use thiserror::Error;

/// Common error types used across the workspace.
///
/// Every variant on the synchronization path is transient: callers log it
/// and retry on the next poll.
#[derive(Debug, Error)]
pub enum BulletinError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BulletinError {
    /// Whether the error came from talking to the backend (as opposed to
    /// local persistence).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            BulletinError::Transport(_) | BulletinError::Status { .. } | BulletinError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BulletinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_fetch_failure() {
        let err = BulletinError::Status {
            status: 502,
            url: "http://localhost:8000/api/notifications".into(),
        };
        assert!(err.is_fetch_failure());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_storage_is_not_fetch_failure() {
        assert!(!BulletinError::Storage("disk full".into()).is_fetch_failure());
    }
}
