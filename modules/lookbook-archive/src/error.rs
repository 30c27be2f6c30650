/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache index error: {0}")]
    Index(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Transport-level failures are worth another attempt; status errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::Network { .. })
    }
}
