use thiserror::Error;

/// Type alias for Result with ArchiveError
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error taxonomy for the attachment archival pipeline
///
/// Variants split along two axes the orchestrator relies on:
/// - fatal vs. message-scoped (`is_fatal`): fatal errors abort the whole
///   batch, everything else is caught at the per-message boundary
/// - retryable vs. permanent (`is_retryable`): transport classification for
///   the calling infrastructure; the pipeline itself never retries in-run
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// No stored credential, or consent missing - requires operator action
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The token endpoint rejected a refresh - fatal for the current run
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Rate limit exceeded - retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Server returned 5xx
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// HTTP 401 - implies an access token expired mid-run, so retryable
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// API-level error that fits no narrower variant
    #[error("API error: {0}")]
    Api(String),

    /// Missing headers, unparseable dates - scoped to a single message
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configured label could not be resolved - batch prerequisite
    #[error("Label error: {0}")]
    Label(String),

    /// Ledger/report persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Transport classification: should the calling infrastructure retry
    /// the operation on its next scheduled invocation?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::RateLimited { .. }
                | ArchiveError::Network(_)
                | ArchiveError::Server { .. }
                | ArchiveError::Unauthorized(_)
        )
    }

    /// Permanent errors should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Fatal errors abort the whole batch instead of being caught at the
    /// per-message boundary
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchiveError::Auth(_)
                | ArchiveError::TokenRefresh(_)
                | ArchiveError::Label(_)
                | ArchiveError::Config(_)
        )
    }

    /// Classify a Gmail API error
    pub fn from_gmail(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status().as_u16();
                if status == 429 {
                    let retry_after = parse_retry_after_header(response);
                    return ArchiveError::RateLimited { retry_after };
                }
                Self::from_status(status, status_message(response))
            }
            google_gmail1::Error::BadRequest(ref err) => {
                ArchiveError::BadRequest(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                ArchiveError::Network(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => ArchiveError::Network(err.to_string()),
            _ => ArchiveError::Api(error.to_string()),
        }
    }

    /// Classify a Drive API error
    pub fn from_drive(error: google_drive3::Error) -> Self {
        match error {
            google_drive3::Error::Failure(ref response) => {
                let status = response.status().as_u16();
                if status == 429 {
                    let retry_after = parse_retry_after_header(response);
                    return ArchiveError::RateLimited { retry_after };
                }
                Self::from_status(status, status_message(response))
            }
            google_drive3::Error::BadRequest(ref err) => {
                ArchiveError::BadRequest(format!("{}", err))
            }
            google_drive3::Error::HttpError(ref err) => {
                ArchiveError::Network(format!("Connection error: {}", err))
            }
            google_drive3::Error::Io(err) => ArchiveError::Network(err.to_string()),
            _ => ArchiveError::Api(error.to_string()),
        }
    }

    /// Map an HTTP status code onto the taxonomy
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => ArchiveError::RateLimited { retry_after: 5 },
            401 => ArchiveError::Unauthorized(message),
            404 => ArchiveError::NotFound(message),
            400 => ArchiveError::BadRequest(message),
            403 => ArchiveError::Forbidden(message),
            500..=599 => ArchiveError::Server { status, message },
            _ => ArchiveError::Api(message),
        }
    }
}

fn status_message<B>(response: &hyper::Response<B>) -> String {
    let status = response.status();
    format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}

/// Parse the Retry-After header from an HTTP response
///
/// The header can be delay-seconds (e.g. "120") or an HTTP date. Missing or
/// invalid values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}
