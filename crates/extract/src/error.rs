use thiserror::Error;

pub type Result<T, E = ExtractError> = std::result::Result<T, E>;

/// Every way an extraction can fail, from input validation to persistence.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("input too large: {length} characters (limit {limit}, exclusive)")]
    InputTooLarge { length: usize, limit: usize },

    #[error("unsupported MIME type: {0}")]
    UnsupportedMimeType(String),

    #[error("unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("model backend failed: {0:#}")]
    Backend(anyhow::Error),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("failed to write result log: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExtractError {
    /// True when the caller can fix the request (shorter text, another file type).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExtractError::InputTooLarge { .. } | ExtractError::UnsupportedMimeType(_)
        )
    }

    /// True for failures worth retrying against the backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractError::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let too_large = ExtractError::InputTooLarge { length: 36_000, limit: 36_000 };
        assert!(too_large.is_client_error());
        assert!(ExtractError::UnsupportedMimeType("image/png".into()).is_client_error());

        let backend = ExtractError::Backend(anyhow::anyhow!("connection reset"));
        assert!(!backend.is_client_error());
        assert!(backend.is_transient());
        assert!(!ExtractError::MalformedResponse("eof".into()).is_transient());
    }

    #[test]
    fn test_backend_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("timed out").context("Failed to send request");
        let err = ExtractError::Backend(cause);
        let message = err.to_string();
        assert!(message.contains("Failed to send request"));
        assert!(message.contains("timed out"));
    }
}
