//! Error types for Pandoc Server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for Pandoc Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Pandoc Server
#[derive(Error, Debug)]
pub enum Error {
    /// No `Authorization` header while a token is configured
    #[error("Missing Authorization header")]
    Unauthenticated,

    /// `Authorization` header does not carry the configured token
    #[error("Invalid Authorization header")]
    Forbidden,

    /// Content type other than `application/json`
    #[error("Invalid Content-Type: {content_type}")]
    BadContentType { content_type: String },

    /// Body is not valid JSON
    #[error("Malformed JSON body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    /// Body could not be read from the connection
    #[error("Failed to read request body: {reason}")]
    BodyRead { reason: String },

    /// Body exceeds the configured limit
    #[error("Request body too large (max: {max_size} bytes)")]
    BodyTooLarge { max_size: usize },

    /// No "files" key in payload
    #[error("No \"files\" in payload")]
    MissingFiles,

    /// "files" is not an object
    #[error("Invalid \"files\" in payload")]
    InvalidFiles,

    /// "extra_files" is present but not an object
    #[error("Invalid \"extra_files\" in payload")]
    InvalidExtraFiles,

    /// No "args" key in payload
    #[error("No \"args\" in payload")]
    MissingArgs,

    /// "args" is not an array of strings
    #[error("Invalid \"args\" in payload")]
    InvalidArgs,

    /// A content descriptor is neither a string nor null
    #[error("Invalid content for file: {name}")]
    InvalidFileContent { name: String },

    /// File name resolves outside the sandbox
    #[error("Invalid file path: {name}")]
    PathTraversal { name: String },

    /// A content descriptor is null
    #[error("Null content for file: {name}")]
    NullContent { name: String },

    /// Content descriptor could not be resolved
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Conversion tool could not be started
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Conversion tool ran past the configured timeout
    #[error("Conversion timed out after {timeout:?}")]
    ConversionTimeout { timeout: std::time::Duration },

    /// Anything else that is the server's fault
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// HTTP status sent to the client for this error.
    ///
    /// Every failure after the payload passed validation (fetching, decoding,
    /// writing, spawning) is the server's to report, so it maps to 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::BadContentType { .. }
            | Error::MalformedBody(_)
            | Error::BodyRead { .. }
            | Error::MissingFiles
            | Error::InvalidFiles
            | Error::InvalidExtraFiles
            | Error::MissingArgs
            | Error::InvalidArgs
            | Error::InvalidFileContent { .. }
            | Error::PathTraversal { .. }
            | Error::NullContent { .. } => StatusCode::BAD_REQUEST,
            Error::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::SourceResolution { .. }
            | Error::Base64Decode(_)
            | Error::HttpRequest(_)
            | Error::SsrfBlocked { .. }
            | Error::DownloadTooLarge { .. }
            | Error::Io(_)
            | Error::Spawn { .. }
            | Error::ConversionTimeout { .. }
            | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors never leak details to the client: the status alone is sent and the
/// full error is logged.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        status.into_response()
    }
}
