use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected status {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Install failed for {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Cache write failed for {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl WorkerError {
    /// Truncate a response body to avoid logging excessive data
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// True for failures where the origin could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, WorkerError::Network(_))
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        WorkerError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(WorkerError::truncate_body("oops"), "oops");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(600);
        let truncated = WorkerError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = "é".repeat(400);
        let truncated = WorkerError::truncate_body(&body);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_is_network() {
        assert!(WorkerError::Network("down".into()).is_network());
        assert!(!WorkerError::Storage("locked".into()).is_network());
    }
}
