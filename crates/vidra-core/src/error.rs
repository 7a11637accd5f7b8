//! Error types module
//!
//! All failures that cross a crate boundary are unified under [`AppError`]. The
//! variants follow the upload/playback taxonomy: validation and cancellation are
//! terminal outcomes, transfer and segment errors are transient network-class
//! failures that callers may recover from locally, and manifest errors are fatal
//! for a playback session.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes like validation failures or cancellation
    Debug,
    /// Warning level - for recoverable network issues
    Warn,
    /// Error level - for unexpected or terminal failures
    Error,
}

/// Metadata describing how an error should be surfaced and whether it may be retried.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "TRANSFER_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether local recovery (retry, downgrade) may be attempted
    fn is_recoverable(&self) -> bool;

    /// Whether this error ends the session it occurred in
    fn is_terminal(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transfer failed after {attempts} attempt(s): {message}")]
    Transfer { attempts: u32, message: String },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Manifest fetch failed: {0}")]
    ManifestFetch(String),

    #[error("Manifest parse failed: {0}")]
    ManifestParse(String),

    #[error("Manifest declares no variants")]
    NoVariants,

    #[error("Segment {index} fetch failed: {message}")]
    SegmentFetch { index: usize, message: String },

    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    #[error("Upload coordination error: {0}")]
    Coordination(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::ManifestParse(format!("invalid URL: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, terminal, log_level).
fn app_error_static_metadata(err: &AppError) -> (&'static str, bool, bool, LogLevel) {
    match err {
        AppError::Validation(_) => ("VALIDATION_ERROR", false, true, LogLevel::Debug),
        AppError::Transfer { .. } => ("TRANSFER_ERROR", true, true, LogLevel::Error),
        AppError::Cancelled => ("CANCELLED", false, true, LogLevel::Debug),
        AppError::ManifestFetch(_) => ("MANIFEST_FETCH_ERROR", false, true, LogLevel::Error),
        AppError::ManifestParse(_) => ("MANIFEST_PARSE_ERROR", false, true, LogLevel::Error),
        AppError::NoVariants => ("NO_VARIANTS", false, true, LogLevel::Error),
        AppError::SegmentFetch { .. } => ("SEGMENT_FETCH_ERROR", true, false, LogLevel::Warn),
        AppError::ProcessingFailure(_) => ("PROCESSING_FAILURE", false, true, LogLevel::Error),
        AppError::Coordination(_) => ("COORDINATION_ERROR", true, true, LogLevel::Error),
        AppError::InvalidState(_) => ("INVALID_STATE", false, false, LogLevel::Debug),
        AppError::InvalidTransition { .. } => {
            ("INVALID_TRANSITION", false, false, LogLevel::Warn)
        }
        AppError::Config(_) => ("CONFIG_ERROR", false, true, LogLevel::Error),
        AppError::Internal(_) => ("INTERNAL_ERROR", false, true, LogLevel::Error),
    }
}

impl AppError {
    /// Get the error type name, matching the taxonomy names used in logs.
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Transfer { .. } => "TransferError",
            AppError::Cancelled => "Cancelled",
            AppError::ManifestFetch(_) => "ManifestFetchError",
            AppError::ManifestParse(_) => "ManifestParseError",
            AppError::NoVariants => "NoVariantsError",
            AppError::SegmentFetch { .. } => "SegmentFetchError",
            AppError::ProcessingFailure(_) => "ProcessingFailure",
            AppError::Coordination(_) => "CoordinationError",
            AppError::InvalidState(_) => "InvalidState",
            AppError::InvalidTransition { .. } => "InvalidTransition",
            AppError::Config(_) => "ConfigError",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn is_terminal(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).3
    }
}
