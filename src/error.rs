//! Error taxonomy for receipt processing.
//!
//! Every failure inside the pipeline ends up as a [`ReceiptError`], which the
//! orchestrator turns into exactly one `error` event for the client.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Stable, machine-readable error kind sent alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoImageProvided,
    InvalidImageData,
    FetchFailed,
    DecodeFailed,
    NoTextDetected,
    Timeout,
    InvalidRequest,
    InternalError,
}

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("no image provided: send either `image` or `url`")]
    NoImageProvided,

    #[error("invalid inline image data: {0}")]
    InvalidImageData(String),

    #[error("image fetch failed with HTTP {0}")]
    FetchStatus(StatusCode),

    #[error("image fetch failed: {0}")]
    FetchTransport(String),

    #[error("could not decode image: {0}")]
    DecodeFailed(String),

    #[error("no text detected in the receipt image")]
    NoTextDetected,

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ReceiptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoImageProvided => ErrorKind::NoImageProvided,
            Self::InvalidImageData(_) => ErrorKind::InvalidImageData,
            Self::FetchStatus(_) | Self::FetchTransport(_) => ErrorKind::FetchFailed,
            Self::DecodeFailed(_) => ErrorKind::DecodeFailed,
            Self::NoTextDetected => ErrorKind::NoTextDetected,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }
}
