use thiserror::Error;

/// Errors produced while driving the browser and capturing receipts
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to connect to browser: {0}")]
    ConnectionFailed(String),

    #[error("Tab operation failed: {0}")]
    TabOperationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// No candidate descriptor resolved to a visible element in any frame
    #[error("Control not found: {0}")]
    ControlNotFound(String),

    /// A resolved element could not be acted upon (detached, obscured, stale)
    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    /// A popup capture could not locate or fetch its artifact source
    #[error("Artifact extraction failed: {0}")]
    ExtractionFailed(String),

    /// Fatal failure of a navigation stage; the batch cannot begin
    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Failed to decode payload: {0}")]
    DecodeFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether this error is fatal to the whole run rather than local to
    /// one identifier
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FetchError::LaunchFailed(_) | FetchError::ConnectionFailed(_) | FetchError::StageFailed { .. }
        )
    }
}

/// Result type alias for ar-fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;
