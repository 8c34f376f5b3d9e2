//! Error taxonomy and JSON error responses for the poster service

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which asset directory came up empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Font,
    Image,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Font => f.write_str("font"),
            AssetKind::Image => f.write_str("image"),
        }
    }
}

/// Everything that can go wrong while producing a poster
#[derive(Debug, Error)]
pub enum PosterError {
    /// A label carried the `xn--` prefix but is not valid Punycode
    #[error("invalid punycode label: {label}")]
    Decode { label: String },

    /// No font or image could be found to render with
    #[error("no {kind} assets available in {}", .dir.display())]
    NoAssetsAvailable { kind: AssetKind, dir: PathBuf },

    /// The render tool could not start, exited non-zero or wrote nothing
    #[error("render tool failed: {reason}")]
    RenderFailure { reason: String, stderr: String },

    /// The render tool did not finish in time and was terminated
    #[error("render tool timed out after {}ms", .0.as_millis())]
    RenderTimeout(Duration),

    /// No usable host identifier on the request
    #[error("missing or invalid Host header")]
    MissingHostHeader,

    /// Host name longer than DNS allows
    #[error("host name is {len} bytes, longer than DNS allows")]
    HostTooLong { len: usize },
}

impl PosterError {
    pub fn render_failure(reason: impl Into<String>, stderr: &[u8]) -> Self {
        PosterError::RenderFailure {
            reason: reason.into(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Error code reported to the client
    pub fn code(&self) -> ErrorCode {
        match self {
            PosterError::Decode { .. } => ErrorCode::InternalError,
            PosterError::NoAssetsAvailable { .. } => ErrorCode::NoAssetsAvailable,
            PosterError::RenderFailure { .. } => ErrorCode::RenderFailed,
            PosterError::RenderTimeout(_) => ErrorCode::RenderTimeout,
            PosterError::MissingHostHeader => ErrorCode::MissingHostHeader,
            PosterError::HostTooLong { .. } => ErrorCode::InvalidHost,
        }
    }

    /// Message safe to send to the client. Paths and renderer output stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            PosterError::Decode { .. } => "Internal error".to_string(),
            PosterError::NoAssetsAvailable { kind, .. } => format!("No {} assets available", kind),
            PosterError::RenderFailure { .. } => "Poster rendering failed".to_string(),
            PosterError::RenderTimeout(timeout) => {
                format!("Poster rendering timed out after {} seconds", timeout.as_secs())
            }
            PosterError::MissingHostHeader => "Missing or invalid Host header".to_string(),
            PosterError::HostTooLong { .. } => "Host name too long".to_string(),
        }
    }
}

/// Error codes for the X-Poster-Error header and JSON body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing Host header in request
    MissingHostHeader,
    /// Host name over 253 bytes
    InvalidHost,
    /// Path other than `/`
    NotFound,
    /// Method other than GET or HEAD on `/`
    MethodNotAllowed,
    /// Font or image directory is empty or missing
    NoAssetsAvailable,
    /// Render tool failed or produced nothing
    RenderFailed,
    /// Render tool exceeded its timeout
    RenderTimeout,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingHostHeader => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidHost => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::NoAssetsAvailable => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::RenderFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::RenderTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_header_value(&self) -> &'static str {
        match self {
            ErrorCode::MissingHostHeader => "MISSING_HOST_HEADER",
            ErrorCode::InvalidHost => "INVALID_HOST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::NoAssetsAvailable => "NO_ASSETS_AVAILABLE",
            ErrorCode::RenderFailed => "RENDER_FAILED",
            ErrorCode::RenderTimeout => "RENDER_TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Poster-Error header
pub fn json_error_response(
    code: ErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Poster-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

impl PosterError {
    /// JSON error response for this failure
    pub fn to_response(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        json_error_response(self.code(), self.public_message())
    }
}
