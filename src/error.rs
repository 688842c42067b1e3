//! Error types for image dispatch and credential handling.

use std::path::PathBuf;
use std::time::Duration;

/// Message fragment Google returns when a selected key no longer resolves.
///
/// Older key-selection flows surface an unusable key this way instead of
/// a 401, so API errors carrying it are treated as credential failures.
pub const CREDENTIAL_INVALIDATION_SIGNATURE: &str = "Requested entity was not found";

/// Maximum length of an error body kept in an error value.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while generating images or managing credentials.
#[derive(Debug, thiserror::Error)]
pub enum DimShiftError {
    /// API key missing, invalid, or rejected by the service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitised error body.
        message: String,
    },

    /// Rate limit or quota exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Wait suggested by the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// The source image could not be read or is not a usable image.
    #[error("failed to read image {path}: {reason}")]
    ImageRead {
        /// File that was selected.
        path: PathBuf,
        /// Why it was refused.
        reason: String,
    },

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed TOML in a config or credential file.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl DimShiftError {
    /// Returns true if this error means the stored credential is no longer usable.
    ///
    /// `Auth` is the structured signal. An `Api` error whose message carries
    /// [`CREDENTIAL_INVALIDATION_SIGNATURE`] is accepted as well, for errors
    /// that were not classified at the provider.
    pub fn invalidates_credential(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Api { message, .. } => message.contains(CREDENTIAL_INVALIDATION_SIGNATURE),
            _ => false,
        }
    }

    /// Returns true if this error is likely transient.
    ///
    /// Nothing in this crate retries; callers may use this to decide
    /// whether to offer the user another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }
}

/// Result type alias for dimshift operations.
pub type Result<T> = std::result::Result<T, DimShiftError>;

/// Collapses whitespace and truncates an error body for display.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    truncated.push_str("...");
    truncated
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
