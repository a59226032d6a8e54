//! Failure kinds for the two request paths.
//!
//! Both enums keep the underlying message as their `Display` text, since
//! that text is what goes back to the caller. `code()` gives tests and
//! clients a stable kind to match on instead.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use image::ImageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file")]
    NoFile,

    #[error("bad type")]
    BadType,

    #[error("{0}")]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    Decode(#[source] ImageError),

    #[error("{0}")]
    Encode(#[source] ImageError),

    #[error("failed to store upload: {0}")]
    Store(#[from] std::io::Error),

    #[error("image task failed: {0}")]
    Task(String),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoFile => "no_file",
            Self::BadType => "bad_type",
            Self::Multipart(_) => "multipart",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Store(_) => "store",
            Self::Task(_) => "task",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoFile | Self::BadType => StatusCode::BAD_REQUEST,
            Self::Multipart(e) => e.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Every variant is reported as a 500; only the `code` differs.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{0}")]
    Request(#[from] serde_json::Error),

    #[error("{0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{0}")]
    Decode(#[source] ImageError),

    #[error("invalid canvas {width}x{height} (each side must be within 1..={max})")]
    Canvas { width: u32, height: u32, max: u32 },

    #[error("{0}")]
    Encode(#[source] ImageError),

    #[error("image task failed: {0}")]
    Task(String),
}

impl ProcessError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Base64(_) => "base64",
            Self::Decode(_) => "decode",
            Self::Canvas { .. } => "canvas",
            Self::Encode(_) => "encode",
            Self::Task(_) => "task",
        }
    }
}
